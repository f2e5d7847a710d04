use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use log::{info, warn};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec};

use crate::error::{Error, Result};
use crate::subscription::SubscriptionManager;
use crate::suit::{Bootloader, SuitConfig, UpdateHandle};
use crate::transport::Transport;

const MAX_LINE_LENGTH: usize = 256;

const HELP: &str = "\
con <addr> [port]  connect to gateway
sub <topic>        subscribe to an update trigger topic
trigger <topic>    start an update from <topic>
current-slot       print the running slot
slot-hdr           print the running slot's header";

/// Line-oriented operator console.
pub struct Shell<T, B> {
    manager: Arc<Mutex<SubscriptionManager<T>>>,
    bootloader: Arc<B>,
    handle: UpdateHandle,
    config: SuitConfig,
}

impl<T: Transport, B: Bootloader> Shell<T, B> {
    pub fn new(
        manager: Arc<Mutex<SubscriptionManager<T>>>,
        bootloader: Arc<B>,
        handle: UpdateHandle,
        config: SuitConfig,
    ) -> Self {
        Self {
            manager,
            bootloader,
            handle,
            config,
        }
    }

    /// Executes commands from `input` until it is closed.
    pub async fn run<R, W>(&self, input: R, mut output: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = FramedRead::new(input, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

        while let Some(line) = lines.next().await {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let reply = match self.execute(&line).await {
                Ok(reply) => reply,
                Err(e) => format!("error: {}", e),
            };
            if !reply.is_empty() {
                output.write_all(reply.as_bytes()).await?;
                output.write_all(b"\n").await?;
            }
        }

        output.flush().await?;
        Ok(())
    }

    pub async fn execute(&self, line: &str) -> Result<String> {
        let mut args = line.split_whitespace();
        let Some(command) = args.next() else {
            return Ok(String::new());
        };

        match command {
            "con" => {
                let addr = args.next().ok_or(Error::Usage("con <addr> [port]"))?;
                let port = match args.next() {
                    Some(port) => port
                        .parse()
                        .map_err(|_| Error::InvalidAddress(port.to_string()))?,
                    None => self.config.gateway_port,
                };
                self.connect(addr, port).await
            }
            "sub" => {
                let topic = args.next().ok_or(Error::Usage("sub <topic>"))?;
                self.manager
                    .lock()
                    .await
                    .subscribe(topic, self.handle.trigger_inbox(), true)
                    .await?;
                Ok(format!("Subscribed to {}", topic))
            }
            "trigger" => {
                let topic = args.next().ok_or(Error::Usage("trigger <topic>"))?;
                self.handle.trigger(topic.as_bytes()).await?;
                Ok(String::new())
            }
            "current-slot" => Ok(format!("Running from slot {}", self.bootloader.current_slot())),
            "slot-hdr" => {
                let slot = self.bootloader.current_slot();
                self.bootloader
                    .header(slot)
                    .map(|header| header.to_string())
                    .ok_or(Error::SlotHeaderInvalid { slot })
            }
            "help" => Ok(HELP.to_string()),
            _ => Err(Error::Usage(HELP)),
        }
    }

    async fn connect(&self, addr: &str, port: u16) -> Result<String> {
        let ip: IpAddr = addr
            .trim_matches(|c| c == '[' || c == ']')
            .parse()
            .map_err(|_| Error::InvalidAddress(addr.to_string()))?;
        let gateway = SocketAddr::new(ip, port);

        let mut manager = self.manager.lock().await;
        manager.connect(gateway).await?;

        let active = self.bootloader.current_slot();
        let inactive = self.bootloader.other_slot();
        let mut status = vec![
            (self.config.slot_active_topic.as_str(), active.to_string()),
            (self.config.slot_inactive_topic.as_str(), inactive.to_string()),
        ];
        match self.bootloader.header(active) {
            Some(header) => status.push((self.config.version_topic.as_str(), format!("{:>10}", header.version))),
            None => warn!("no header for slot {}, not publishing version", active),
        }

        for (topic, value) in status {
            if let Err(e) = manager.publish(topic, value.as_bytes()).await {
                warn!("unable to publish {}: {}", topic, e);
            }
        }

        info!("gateway {} ready", gateway);
        Ok(format!("Successfully connected to gateway at {}", gateway))
    }
}
