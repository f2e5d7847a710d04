use std::fmt;

/// Which transfer a block stream belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Manifest,
    Firmware,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Manifest => f.write_str("manifest"),
            StreamKind::Firmware => f.write_str("firmware"),
        }
    }
}

/// Verdict of the ordering guard on one received block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accepted(usize),
    OutOfOrder { expected: usize },
    Duplicate,
}

/// What a publish on a blockwise topic carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockEvent {
    Count(usize),
    Block(usize),
}
