use crate::blockwise::StreamKind;

/// Numeric alias the transport assigns to a registered topic name.
pub type TopicId = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QoS {
    AtMostOnce = 0,
    #[default]
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

/// Consumer fed by a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Trigger,
    Stream(StreamKind),
}
