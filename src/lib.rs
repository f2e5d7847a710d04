//! SUIT Firmware Update Client over MQTT-SN
//!
//! This library fetches SUIT manifests and firmware images published as
//! numbered blocks on an MQTT-SN gateway, writes them into a storage slot and
//! hands over to the bootloader.
//!
//! # Features
//! - Bounded topic pool with least-recently-used eviction
//! - One reconnect to the last known good gateway on disconnect
//! - Strictly ordered block reassembly, one block subscription at a time
//! - Size-checked streaming of firmware into storage
//! - Per-block timeouts and session preemption by a newer trigger
//! - Line-oriented command shell
//!
//! # Block Protocol
//! A payload of `N` blocks published under topic `t` is announced as the
//! ASCII decimal `N` on `t`; block `i` follows on `t/i`. Every block except
//! the last is exactly `block_size` bytes long.
//!
//! # Examples
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use suit_mqttsn::SuitConfig;
//!
//! #[tokio::main]
//! async fn main() -> suit_mqttsn::Result<()> {
//!     let config = suit_mqttsn::new_config()
//!         .with_block_timeout(Some(std::time::Duration::from_secs(10)));
//!
//!     // transport, parser, storage and bootloader come from the platform
//!     let (shell, _handle, worker) =
//!         suit_mqttsn::spawn_update_client(transport, parser, storage, Arc::new(bootloader), config)?;
//!
//!     shell.run(tokio::io::stdin(), tokio::io::stdout()).await?;
//!     worker.abort();
//!     Ok(())
//! }
//! ```

pub mod blockwise;
mod error;
mod shell;
pub mod subscription;
pub mod suit;
pub mod transport;

#[cfg(test)]
mod mock;

pub use error::{
    ConnectError, Error, ParseError, Result, StorageError, SubscribeError, TransportError,
};
pub use shell::Shell;
pub use subscription::{EvictionPolicy, SubscriptionManager};
pub use suit::{
    Bootloader, Manifest, ManifestParser, Orchestrator, SessionOutcome, SlotHeader, State, Status,
    StorageBackend, SuitConfig, UpdateHandle,
};
pub use transport::{Inbox, QoS, Transport};

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Spawns the update worker and returns a shell bound to it.
pub fn spawn_update_client<T, P, S, B>(
    transport: T,
    parser: P,
    storage: S,
    bootloader: Arc<B>,
    config: SuitConfig,
) -> Result<(Shell<T, B>, UpdateHandle, JoinHandle<()>)>
where
    T: Transport + 'static,
    P: ManifestParser + 'static,
    S: StorageBackend + 'static,
    B: Bootloader + 'static,
{
    let manager = Arc::new(Mutex::new(SubscriptionManager::new(transport, &config)));
    let (orchestrator, handle) = Orchestrator::new(
        config.clone(),
        manager.clone(),
        parser,
        storage,
        bootloader.clone(),
    )?;

    let worker = tokio::spawn(orchestrator.run());
    let shell = Shell::new(manager, bootloader, handle.clone(), config);
    Ok((shell, handle, worker))
}

/// Creates a new configuration with default settings
pub fn new_config() -> SuitConfig {
    SuitConfig::new()
}
