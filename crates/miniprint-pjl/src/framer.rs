// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PJL request framing.
//
// A single socket read may carry several commands.  Clients typically open
// with the Universal Exit Language sequence and then send one or more
// `@PJL` lines:
//
// ```text
// ESC%-12345X@PJL INFO ID\r\n@PJL ECHO DELIMITER1234\r\n\r\nESC%-12345X
// ```
//
// The buffer is split on the `@PJL` token; each segment becomes a `Command`.
// Whatever follows the command line (CR, LF, a trailing UEL) is kept as the
// command's terminator so replies can end the way the client expects.

use std::collections::HashMap;

use thiserror::Error;

/// Universal Exit Language: resets the printer's language interpreter.
pub const UEL: &str = "\x1b%-12345X";

/// Token introducing every PJL command.
pub const PJL_PREFIX: &str = "@PJL";

/// Errors that make a request unframeable.  Fatal to the session.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("request is not valid UTF-8: {0}")]
    Decode(#[from] std::str::Utf8Error),
}

/// One PJL command as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Canonical verb from the verb table (upper case), or the leading token
    /// of the segment when no registered verb matched.
    pub verb: String,
    /// Everything after the verb on the command line, trimmed.
    pub raw_parameters: String,
    /// Control characters following the command line, verbatim.
    pub terminator: String,
}

impl Command {
    /// Parse `KEY=VALUE` tokens out of the parameters.
    ///
    /// Tokens are separated by whitespace outside of double quotes.  Values
    /// keep their quotes so handlers can echo them back verbatim.  Later
    /// duplicates win.
    pub fn parameters(&self) -> HashMap<String, String> {
        tokenize(&self.raw_parameters)
            .into_iter()
            .filter_map(|token| {
                token
                    .split_once('=')
                    .map(|(key, value)| (key.to_string(), value.to_string()))
            })
            .collect()
    }

    /// Shorthand for a single parameter.
    pub fn parameter(&self, key: &str) -> Option<String> {
        self.parameters().remove(key)
    }
}

/// Decode a raw read into text.
pub fn decode(bytes: &[u8]) -> Result<&str, FrameError> {
    Ok(std::str::from_utf8(bytes)?)
}

/// Split a decoded request into commands.
///
/// `verbs` lists every registered verb.  The longest one matching the start of
/// a segment wins, so `INFO STATUS` is never mistaken for a shorter `INFO`
/// entry.  An empty result means the client sent nothing usable.
pub fn frame(request: &str, verbs: &[&str]) -> Vec<Command> {
    let body = request.trim_start_matches(UEL);

    body.split(PJL_PREFIX)
        .filter(|segment| !segment.trim().is_empty())
        .map(|segment| parse_segment(segment, verbs))
        .collect()
}

fn parse_segment(segment: &str, verbs: &[&str]) -> Command {
    let segment = segment.trim_start();
    let line_end = segment
        .find(['\r', '\n', '\x1b'])
        .unwrap_or(segment.len());
    let (line, terminator) = segment.split_at(line_end);

    let (verb, rest) = match match_verb(line, verbs) {
        Some(verb) => (verb.to_string(), &line[verb.len()..]),
        None => {
            let token_end = line
                .find(|c: char| !c.is_ascii_alphanumeric())
                .unwrap_or(line.len());
            (line[..token_end].to_string(), &line[token_end..])
        }
    };

    Command {
        verb,
        raw_parameters: rest.trim().to_string(),
        terminator: terminator.to_string(),
    }
}

/// Longest registered verb that `line` starts with, ignoring ASCII case.  The
/// match has to end on a token boundary.
fn match_verb<'v>(line: &str, verbs: &[&'v str]) -> Option<&'v str> {
    verbs
        .iter()
        .copied()
        .filter(|verb| {
            let Some(head) = line.get(..verb.len()) else {
                return false;
            };
            let boundary = line[verb.len()..]
                .chars()
                .next()
                .is_none_or(|c| !c.is_ascii_alphanumeric());
            head.eq_ignore_ascii_case(verb) && boundary
        })
        .max_by_key(|verb| verb.len())
}

/// Whitespace tokenizer that keeps double-quoted runs together.
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for c in input.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
