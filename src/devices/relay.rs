//! Serial relay board
//!
//! The board speaks a line protocol: `relay on N`, `relay off N` and
//! `relay read N`, each terminated by `\n\r`. A read answers with a line
//! containing `on` or `off`.

use crate::devices::{CommandTag, DeviceId};
use crate::error::{PlantError, Result};
use crate::error_recovery::{CallKind, ChannelGuard};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Transport to the relay board; one command in flight at a time
#[async_trait]
pub trait RelayLink: Send + Sync {
    /// Send one command line and return the board's reply
    async fn transact(&self, command: &str) -> Result<String>;
}

pub fn on_command(id: DeviceId) -> String {
    format!("relay on {}\n\r", id.wire_id())
}

pub fn off_command(id: DeviceId) -> String {
    format!("relay off {}\n\r", id.wire_id())
}

pub fn read_command(id: DeviceId) -> String {
    format!("relay read {}\n\r", id.wire_id())
}

/// Parse a `relay read` reply
///
/// The board echoes the command and ends with a `>` prompt; the state is
/// the last line in between.
pub fn parse_state(reply: &str) -> Result<bool> {
    let state = reply
        .split(['\n', '\r'])
        .map(str::trim)
        .filter(|line| !line.is_empty() && *line != ">")
        .last()
        .map(str::to_ascii_lowercase);
    match state.as_deref() {
        Some("on") => Ok(true),
        Some("off") => Ok(false),
        _ => Err(PlantError::device_comm(format!(
            "unrecognised relay reply: {:?}",
            reply.trim()
        ))),
    }
}

/// Relay outputs behind the reliability wrappers
pub struct RelayBoard {
    link: Arc<dyn RelayLink>,
    guard: Arc<ChannelGuard>,
}

impl RelayBoard {
    pub fn new(link: Arc<dyn RelayLink>, guard: Arc<ChannelGuard>) -> Self {
        Self { link, guard }
    }

    /// Read the relay's current output
    pub async fn read_state(&self, id: DeviceId) -> Result<bool> {
        let command = read_command(id);
        let link = self.link.clone();
        let state = self
            .guard
            .call(&id.channel(), CallKind::Read, || async move {
                let reply = link.transact(&command).await?;
                parse_state(&reply)
            })
            .await?;
        debug!(device = %id, on = state, "Relay read");
        Ok(state)
    }

    /// Drive the relay on or off
    pub async fn write_state(&self, id: DeviceId, on: bool, tag: CommandTag) -> Result<()> {
        let command = if on { on_command(id) } else { off_command(id) };
        let link = self.link.clone();
        let kind = CallKind::Command {
            exempt: tag.is_rate_limit_exempt(),
        };
        self.guard
            .call(&id.channel(), kind, || async move {
                link.transact(&command).await.map(|_| ())
            })
            .await?;
        info!(device = %id, on = on, tag = ?tag, "Relay switched");
        Ok(())
    }
}
