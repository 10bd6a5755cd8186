// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PJL command dispatch.
//
// The dispatcher owns the verb table: a list of `(verb, handler)` pairs built
// once at startup and shared read-only by every session.  Each handler turns
// one `Command` into a reply fragment using the session's `Printer` (identity
// plus virtual volume).  Fragments for a batch are concatenated in command
// order and written back in a single send.
//
// # Supported verbs
//
//   - ECHO                  echo the parameters back (clients use it as a
//                           delimiter to find the end of a reply)
//   - USTATUSOFF            empty acknowledgement
//   - INFO ID               model string
//   - INFO STATUS           status code, panel message, online flag
//   - FSDIRLIST             list a directory on the virtual volume
//   - FSQUERY               stat a path on the virtual volume
//   - FSMKDIR, FSUPLOAD,
//     FSDOWNLOAD, RDYMSG    empty acknowledgement, nothing is changed
//
// Anything else is reported as unknown and contributes nothing to the reply.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use miniprint_core::types::PrinterIdentity;
use thiserror::Error;

use crate::events::SessionEvent;
use crate::framer::{self, Command};
use crate::vfs::{self, Lookup, NodeKind, VirtualFilesystem};

/// Fixed prefix of every reply line.
const REPLY_PREFIX: &str = "@PJL";

// ---------------------------------------------------------------------------
// Handler plumbing
// ---------------------------------------------------------------------------

/// A fault inside a handler.  Reported, never sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("missing {0} parameter")]
    MissingParameter(&'static str),

    #[error("malformed volume name {0:?}: expected \"<volume>:<path>\"")]
    MalformedPath(String),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(message) => (*message).to_string(),
                Err(_) => "non-string panic payload".to_string(),
            },
        };
        Self::Panicked(message)
    }
}

/// Per-session device state handlers read from.
#[derive(Debug, Clone)]
pub struct Printer {
    pub identity: PrinterIdentity,
    pub filesystem: VirtualFilesystem,
}

impl Printer {
    /// A printer with the given identity and a freshly bootstrapped volume.
    pub fn new(identity: PrinterIdentity) -> Self {
        Self {
            identity,
            filesystem: VirtualFilesystem::bootstrap(),
        }
    }
}

impl Default for Printer {
    fn default() -> Self {
        Self::new(PrinterIdentity::default())
    }
}

/// Produces the reply fragment for one command.
pub type Handler = fn(&Command, &Printer) -> Result<String, HandlerError>;

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Verb table plus batch dispatch.
#[derive(Clone)]
pub struct Dispatcher {
    handlers: Vec<(&'static str, Handler)>,
    verbs: Vec<&'static str>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("verbs", &self.verbs)
            .finish()
    }
}

impl Dispatcher {
    /// A dispatcher that recognizes nothing.
    pub fn empty() -> Self {
        Self {
            handlers: Vec::new(),
            verbs: Vec::new(),
        }
    }

    /// The standard LaserJet verb set.
    pub fn standard() -> Self {
        let mut dispatcher = Self::empty();
        dispatcher
            .register("ECHO", handle_echo)
            .register("USTATUSOFF", handle_acknowledge)
            .register("INFO ID", handle_info_id)
            .register("INFO STATUS", handle_info_status)
            .register("FSDIRLIST", handle_fsdirlist)
            .register("FSQUERY", handle_fsquery)
            .register("FSMKDIR", handle_acknowledge)
            .register("FSUPLOAD", handle_acknowledge)
            .register("FSDOWNLOAD", handle_acknowledge)
            .register("RDYMSG", handle_acknowledge);
        dispatcher
    }

    /// Add or replace the handler for `verb`.  Verbs are matched
    /// case-insensitively; compound verbs use a single space (`INFO ID`).
    pub fn register(&mut self, verb: &'static str, handler: Handler) -> &mut Self {
        match self.handlers.iter_mut().find(|(v, _)| *v == verb) {
            Some(entry) => entry.1 = handler,
            None => {
                self.handlers.push((verb, handler));
                self.verbs.push(verb);
            }
        }
        self
    }

    /// Every registered verb, in registration order.
    pub fn verbs(&self) -> &[&'static str] {
        &self.verbs
    }

    /// The handler registered under exactly `verb`, if any.
    pub fn handler(&self, verb: &str) -> Option<Handler> {
        self.handlers
            .iter()
            .find(|(v, _)| *v == verb)
            .map(|(_, handler)| *handler)
    }

    /// Frame a decoded request against this dispatcher's verb table.
    pub fn frame(&self, request: &str) -> Vec<Command> {
        framer::frame(request, &self.verbs)
    }

    /// Run every command in `commands` and return the combined reply.
    ///
    /// Unknown verbs and handler faults, panics included, are passed to
    /// `report` and skipped; they never abort the rest of the batch.
    pub fn dispatch(
        &self,
        commands: &[Command],
        printer: &Printer,
        report: &mut dyn FnMut(SessionEvent),
    ) -> String {
        let mut response = String::new();

        for command in commands {
            let Some(handler) = self.handler(&command.verb) else {
                report(SessionEvent::CommandUnknown {
                    verb: command.verb.clone(),
                    parameters: command.raw_parameters.clone(),
                });
                continue;
            };

            let outcome = catch_unwind(AssertUnwindSafe(|| handler(command, printer)))
                .unwrap_or_else(|payload| Err(HandlerError::from_panic(payload)));

            match outcome {
                Ok(fragment) => response.push_str(&fragment),
                Err(e) => report(SessionEvent::HandlerError {
                    verb: command.verb.clone(),
                    detail: e.to_string(),
                }),
            }
        }

        response
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn handle_echo(command: &Command, _printer: &Printer) -> Result<String, HandlerError> {
    let mut reply = format!("{REPLY_PREFIX} ECHO");
    if !command.raw_parameters.is_empty() {
        reply.push(' ');
        reply.push_str(&command.raw_parameters);
    }
    reply.push_str(&command.terminator);
    Ok(reply)
}

/// USTATUSOFF and the inert filesystem verbs: acknowledged with nothing.
fn handle_acknowledge(_command: &Command, _printer: &Printer) -> Result<String, HandlerError> {
    Ok(String::new())
}

fn handle_info_id(command: &Command, printer: &Printer) -> Result<String, HandlerError> {
    Ok(format!(
        "{REPLY_PREFIX} INFO ID\r\n{}\r\n{}",
        printer.identity.id, command.terminator
    ))
}

/// The client's terminator follows `ONLINE=` directly.  The flag is
/// upper-case, as a LaserJet 4200 reports it.
fn handle_info_status(command: &Command, printer: &Printer) -> Result<String, HandlerError> {
    let identity = &printer.identity;
    Ok(format!(
        "{REPLY_PREFIX} INFO STATUS\r\nCODE={}\r\nDISPLAY={}\r\nONLINE={}{}",
        identity.status_code,
        identity.ready_message,
        if identity.online { "TRUE" } else { "FALSE" },
        command.terminator
    ))
}

fn handle_fsdirlist(command: &Command, printer: &Printer) -> Result<String, HandlerError> {
    let (name, path) = volume_path(command)?;

    let mut reply = format!("{REPLY_PREFIX} FSDIRLIST NAME={name} ENTRY=1\r\n. TYPE=DIR\r\n.. TYPE=DIR");
    for node in printer.filesystem.list_children(&path) {
        match node.kind {
            NodeKind::File => {
                reply.push_str(&format!("\r\n{} TYPE=FILE SIZE={}", node.name, node.size));
            }
            NodeKind::Directory => {
                reply.push_str(&format!("\r\n{} TYPE=DIR", node.name));
            }
        }
    }
    reply.push_str(&command.terminator);
    Ok(reply)
}

fn handle_fsquery(command: &Command, printer: &Printer) -> Result<String, HandlerError> {
    let (name, path) = volume_path(command)?;

    // File contents are never stored, so sizes are always reported as 0.
    let data = match printer.filesystem.lookup(&path) {
        Lookup::File { .. } => format!("NAME={name} TYPE=FILE SIZE=0"),
        Lookup::Directory => format!("NAME={name} TYPE=DIR"),
        Lookup::NotFound => String::new(),
    };
    Ok(format!("{REPLY_PREFIX} FSQUERY {data}{}", command.terminator))
}

/// The `NAME=` parameter as sent, and the volume path it refers to.
fn volume_path(command: &Command) -> Result<(String, String), HandlerError> {
    let name = command
        .parameter("NAME")
        .ok_or(HandlerError::MissingParameter("NAME"))?;
    let path = vfs::resolve_device_path(&name).ok_or_else(|| HandlerError::MalformedPath(name.clone()))?;
    Ok((name, path))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
