// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Listener and session configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MiniprintError, Result};
use crate::types::PrinterIdentity;

/// Raw TCP port spoken by JetDirect-style printers.
pub const DEFAULT_PORT: u16 = 9100;

/// Seconds to wait for the next request before hanging up.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 120;

/// Size of a single socket read.  A request larger than this arrives as
/// several batches.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 1024;

/// Settings consumed by the listener and every session it spawns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host name or address to bind to.
    pub bind_host: String,
    /// TCP port to listen on (0 picks an ephemeral port).
    pub port: u16,
    /// Idle timeout applied to every read.
    pub idle_timeout_secs: u64,
    /// Bytes requested per socket read.
    pub recv_buffer_size: usize,
    /// Device identity reported to clients.
    pub identity: PrinterIdentity,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "localhost".into(),
            port: DEFAULT_PORT,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            identity: PrinterIdentity::default(),
        }
    }
}

impl ServerConfig {
    /// Load a configuration from a JSON file.  Missing fields take their
    /// defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the session loop cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.bind_host.trim().is_empty() {
            return Err(MiniprintError::Config("bind_host must not be empty".into()));
        }
        if self.idle_timeout_secs == 0 {
            return Err(MiniprintError::Config(
                "idle_timeout_secs must be at least 1".into(),
            ));
        }
        if self.recv_buffer_size == 0 {
            return Err(MiniprintError::Config(
                "recv_buffer_size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// `host:port` string suitable for `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}
