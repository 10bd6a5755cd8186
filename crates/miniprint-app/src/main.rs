// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Miniprint — medium-interaction printer honeypot
//
// Entry point. Parses options, initialises logging (console + log file),
// wires up the event sinks and runs the PJL listener until interrupted.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use miniprint_core::config::ServerConfig;
use miniprint_core::error::{MiniprintError, Result};
use miniprint_pjl::{FanoutSink, JsonLinesSink, PjlServer, TracingSink};

/// A medium interaction printer honeypot speaking PJL on raw TCP.
#[derive(Parser, Debug)]
#[command(name = "miniprint")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file; flags below override its values
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Host to bind the server to [default: localhost]
    #[arg(short = 'b', long)]
    bind: Option<String>,

    /// Port to listen on [default: 9100]
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Maximum seconds to wait for a command before disconnecting a client [default: 120]
    #[arg(short = 't', long)]
    timeout: Option<u64>,

    /// File to write the human-readable log to
    #[arg(short = 'l', long, default_value = "./miniprint.log")]
    log_file: PathBuf,

    /// Append one JSON record per session event to this file
    #[arg(short = 'e', long)]
    event_log: Option<PathBuf>,

    /// Model string reported by INFO ID
    #[arg(long)]
    printer_id: Option<String>,

    /// Front-panel message reported by INFO STATUS
    #[arg(long)]
    ready_message: Option<String>,

    /// Report the printer as offline
    #[arg(long)]
    offline: bool,
}

impl Args {
    /// Configuration file (or defaults) with command-line overrides applied.
    fn server_config(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_json_file(path)?,
            None => ServerConfig::default(),
        };

        if let Some(bind) = &self.bind {
            config.bind_host = bind.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(timeout) = self.timeout {
            config.idle_timeout_secs = timeout;
        }
        if let Some(id) = &self.printer_id {
            config.identity.id = id.clone();
        }
        if let Some(message) = &self.ready_message {
            config.identity.ready_message = message.clone();
        }
        if self.offline {
            config.identity.online = false;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_logging(log_file: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .map_err(|e| MiniprintError::Config(format!("log file {}: {e}", log_file.display())))?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_file)?;

    let config = args.server_config()?;

    let mut sink = FanoutSink::new().with(Arc::new(TracingSink));
    if let Some(path) = &args.event_log {
        sink = sink.with(Arc::new(JsonLinesSink::open(path)?));
        tracing::info!(path = %path.display(), "event journal enabled");
    }

    tracing::info!(
        printer = %config.identity.id,
        timeout_secs = config.idle_timeout_secs,
        "Miniprint starting"
    );

    let mut server = PjlServer::new(config, Arc::new(sink));
    server.start().await?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }

    server.stop().await?;
    tracing::info!("Miniprint stopped");
    Ok(())
}
