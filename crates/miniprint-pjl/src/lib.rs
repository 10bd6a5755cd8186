// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Miniprint PJL — the protocol engine of the honeypot: request framing, verb
// dispatch, the sandboxed virtual volume, the per-connection session loop and
// the raw TCP listener that ties them together.  Configuration and errors
// come from `miniprint-core`.

pub mod dispatcher;
pub mod events;
pub mod framer;
pub mod server;
pub mod session;
pub mod vfs;

pub use dispatcher::{Dispatcher, Printer};
pub use events::{
    CloseReason, EventRecord, EventSink, FanoutSink, JsonLinesSink, MemorySink, SessionEvent,
    TracingSink,
};
pub use framer::Command;
pub use server::PjlServer;
pub use session::{Session, SessionContext};
pub use vfs::VirtualFilesystem;
