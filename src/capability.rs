// src/capability.rs

//! Optional capabilities
//!
//! Some requests need collaborators that may be absent: `--use-local` needs
//! a local build output directory, and non-`file://` channels need a remote
//! fetcher, which this build does not carry. Both are checked once when an
//! orchestration starts so the failure is a tagged
//! [`Error::MissingOptionalCapability`] instead of an error deep inside
//! index fetching.

use crate::config::Config;
use crate::error::{Error, Result};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Packages built locally, used with `--use-local`
    LocalBuilds,
    /// Channels reachable only over the network
    RemoteChannels,
}

impl Capability {
    pub fn name(&self) -> &'static str {
        match self {
            Capability::LocalBuilds => "local build channel",
            Capability::RemoteChannels => "remote channel fetching",
        }
    }
}

/// Fail unless `capability` is usable with this configuration
pub fn require(config: &Config, capability: Capability) -> Result<()> {
    match capability {
        Capability::LocalBuilds => {
            if config.local_build_root.is_none() {
                return Err(Error::MissingOptionalCapability {
                    capability: capability.name().to_string(),
                    remedy: "set local_build_root in ~/.stratarc to use --use-local".to_string(),
                });
            }
        }
        Capability::RemoteChannels => {
            return Err(Error::MissingOptionalCapability {
                capability: capability.name().to_string(),
                remedy: "mirror the channel to a local directory, or pass --offline".to_string(),
            });
        }
    }
    debug!("Capability available: {}", capability.name());
    Ok(())
}

/// Whether a channel needs network access
pub fn is_remote_channel(channel: &str) -> bool {
    channel.contains("://") && !channel.starts_with("file://")
}

/// Probe everything a request needs before any work is done
pub fn probe(config: &Config, channels: &[String], use_local: bool, offline: bool) -> Result<()> {
    if use_local {
        require(config, Capability::LocalBuilds)?;
    }
    let offline = offline || config.offline;
    if !offline && channels.iter().any(|c| is_remote_channel(c)) {
        require(config, Capability::RemoteChannels)?;
    }
    Ok(())
}
