// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Miniprint.

use thiserror::Error;

/// Top-level error type for all Miniprint operations.
///
/// Protocol-level faults never surface here: a misbehaving client only ever
/// ends its own session.  These variants cover the host side (binding,
/// configuration, the event journal).
#[derive(Debug, Error)]
pub enum MiniprintError {
    // -- Listener errors --
    #[error("listener error: {0}")]
    Listener(String),

    #[error("invalid bind address {addr}: {reason}")]
    BindAddress { addr: String, reason: String },

    // -- Configuration --
    #[error("invalid configuration: {0}")]
    Config(String),

    // -- Event journal --
    #[error("event journal error: {0}")]
    Journal(String),

    // -- Storage / serialization --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, MiniprintError>;
