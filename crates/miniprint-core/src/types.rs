// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Miniprint honeypot.

use serde::{Deserialize, Serialize};

/// Default model string reported by `INFO ID`.
pub const DEFAULT_PRINTER_ID: &str = "hp LaserJet 4200";

/// Default PJL status code (10001 = "Ready", online).
pub const DEFAULT_STATUS_CODE: u32 = 10001;

/// Default front-panel message.
pub const DEFAULT_READY_MESSAGE: &str = "Ready";

/// Describes the device being impersonated.
///
/// Read by the `INFO ID` and `INFO STATUS` handlers and nothing else.  Each
/// session works on its own clone, so changing the configured identity never
/// affects a session that is already running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrinterIdentity {
    /// Model string, e.g. `hp LaserJet 4200`.
    pub id: String,
    /// Numeric PJL status code.
    pub status_code: u32,
    /// Text shown on the emulated front panel.
    pub ready_message: String,
    /// Whether the device reports itself online.
    pub online: bool,
}

impl Default for PrinterIdentity {
    fn default() -> Self {
        Self {
            id: DEFAULT_PRINTER_ID.into(),
            status_code: DEFAULT_STATUS_CODE,
            ready_message: DEFAULT_READY_MESSAGE.into(),
            online: true,
        }
    }
}

/// Lifecycle state of the PJL listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    Stopped,
    Starting,
    Running,
}
