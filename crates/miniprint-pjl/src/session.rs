// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// One emulated printer conversation.
//
// A `Session` owns an accepted connection for its whole life:
//
// ```text
// Accepted --> Active --(read, frame, dispatch, write)--> Active
//                 |
//                 +--(timeout | EOF | read error | bad UTF-8 | empty | write error)--> Closed
// ```
//
// The session builds its own `Printer` (identity snapshot and a fresh virtual
// volume) so nothing a client does is visible to any other connection.  All
// observations go to the injected `EventSink`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use miniprint_core::config::ServerConfig;
use miniprint_core::types::PrinterIdentity;

use crate::dispatcher::{Dispatcher, Printer};
use crate::events::{CloseReason, EventRecord, EventSink, SessionEvent};
use crate::framer;

// ---------------------------------------------------------------------------
// Shared context
// ---------------------------------------------------------------------------

/// Everything a new session needs from the listener.  Read-only and shared.
#[derive(Clone)]
pub struct SessionContext {
    pub identity: PrinterIdentity,
    pub idle_timeout: Duration,
    pub recv_buffer_size: usize,
    pub dispatcher: Arc<Dispatcher>,
    pub sink: Arc<dyn EventSink>,
}

impl SessionContext {
    /// Context for the standard verb set.
    pub fn new(config: &ServerConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            identity: config.identity.clone(),
            idle_timeout: config.idle_timeout(),
            recv_buffer_size: config.recv_buffer_size.max(1),
            dispatcher: Arc::new(Dispatcher::standard()),
            sink,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Arc::new(dispatcher);
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Accepted,
    Active,
    Closed(CloseReason),
}

pub struct Session<S> {
    id: Uuid,
    peer: SocketAddr,
    stream: S,
    printer: Printer,
    idle_timeout: Duration,
    recv_buffer_size: usize,
    dispatcher: Arc<Dispatcher>,
    sink: Arc<dyn EventSink>,
    state: SessionState,
    requests: u64,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, peer: SocketAddr, context: &SessionContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            stream,
            printer: Printer::new(context.identity.clone()),
            idle_timeout: context.idle_timeout,
            recv_buffer_size: context.recv_buffer_size,
            dispatcher: Arc::clone(&context.dispatcher),
            sink: Arc::clone(&context.sink),
            state: SessionState::Accepted,
            requests: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Serve the connection until it closes.  The stream is dropped on return.
    pub async fn run(mut self) -> CloseReason {
        self.emit(SessionEvent::ConnectionOpened);
        self.state = SessionState::Active;

        let mut buf = vec![0u8; self.recv_buffer_size];
        let reason = loop {
            if let Err(reason) = self.serve_request(&mut buf).await {
                break reason;
            }
        };

        self.state = SessionState::Closed(reason.clone());
        self.emit(SessionEvent::ConnectionClosed {
            reason: reason.clone(),
            requests: self.requests,
        });
        reason
    }

    /// One receive / frame / dispatch / respond round.  `Err` ends the
    /// session.
    async fn serve_request(&mut self, buf: &mut [u8]) -> Result<(), CloseReason> {
        let read = tokio::time::timeout(self.idle_timeout, self.stream.read(buf)).await;
        let n = match read {
            Err(_elapsed) => return Err(CloseReason::IdleTimeout),
            Ok(Err(e)) => return Err(CloseReason::ReceiveError(e.to_string())),
            Ok(Ok(0)) => return Err(CloseReason::ClientClosed),
            Ok(Ok(n)) => n,
        };
        let data = &buf[..n];
        self.emit(SessionEvent::request(data));

        let request = framer::decode(data).map_err(|e| CloseReason::DecodeError(e.to_string()))?;
        let commands = self.dispatcher.frame(request);
        if commands.is_empty() {
            return Err(CloseReason::EmptyRequest);
        }

        let response = self
            .dispatcher
            .dispatch(&commands, &self.printer, &mut |event| self.emit(event));

        self.stream
            .write_all(response.as_bytes())
            .await
            .map_err(|e| CloseReason::SendError(e.to_string()))?;
        self.stream
            .flush()
            .await
            .map_err(|e| CloseReason::SendError(e.to_string()))?;

        self.requests += 1;
        self.emit(SessionEvent::response(&response));
        Ok(())
    }

    fn emit(&self, event: SessionEvent) {
        self.sink
            .record(&EventRecord::new(self.id, self.peer, event));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tokio::io::DuplexStream;

    use super::*;
    use crate::dispatcher::HandlerError;
    use crate::events::MemorySink;
    use crate::framer::Command;

    fn peer() -> SocketAddr {
        "198.51.100.23:51515".parse().unwrap()
    }

    fn context(sink: Arc<MemorySink>) -> SessionContext {
        SessionContext::new(&ServerConfig::default(), sink)
    }

    /// Start a session on one end of an in-memory pipe and hand back the
    /// other end.
    fn spawn_session(
        context: SessionContext,
    ) -> (DuplexStream, tokio::task::JoinHandle<CloseReason>) {
        let (client, server) = tokio::io::duplex(16 * 1024);
        let session = Session::new(server, peer(), &context);
        assert_eq!(session.state(), &SessionState::Accepted);
        (client, tokio::spawn(session.run()))
    }

    async fn roundtrip(client: &mut DuplexStream, request: &[u8], expected: &str) {
        client.write_all(request).await.unwrap();
        let mut reply = vec![0u8; expected.len()];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(String::from_utf8(reply).unwrap(), expected);
    }

    #[tokio::test]
    async fn answers_info_id_then_closes_on_eof() {
        let sink = Arc::new(MemorySink::new());
        let (mut client, handle) = spawn_session(context(sink.clone()));

        roundtrip(
            &mut client,
            b"\x1b%-12345X@PJL INFO ID\r\n",
            "@PJL INFO ID\r\nhp LaserJet 4200\r\n\r\n",
        )
        .await;
        drop(client);

        assert_eq!(handle.await.unwrap(), CloseReason::ClientClosed);

        let events = sink.events();
        assert_eq!(events.first(), Some(&SessionEvent::ConnectionOpened));
        assert!(matches!(events[1], SessionEvent::RequestReceived { bytes: 23, .. }));
        assert!(matches!(events[2], SessionEvent::ResponseSent { .. }));
        assert_eq!(
            events.last(),
            Some(&SessionEvent::ConnectionClosed {
                reason: CloseReason::ClientClosed,
                requests: 1,
            })
        );
    }

    #[tokio::test]
    async fn every_record_carries_the_session_id() {
        let sink = Arc::new(MemorySink::new());
        let (client, server) = tokio::io::duplex(1024);
        let session = Session::new(server, peer(), &context(sink.clone()));
        let id = session.id();
        drop(client);
        session.run().await;

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.session_id == id && r.peer == peer()));
    }

    #[tokio::test]
    async fn serves_several_requests_on_one_connection() {
        let sink = Arc::new(MemorySink::new());
        let (mut client, handle) = spawn_session(context(sink.clone()));

        roundtrip(
            &mut client,
            b"@PJL FSQUERY NAME=\"0:\\PJL\"\r\n",
            "@PJL FSQUERY NAME=\"0:\\PJL\" TYPE=DIR\r\n",
        )
        .await;
        roundtrip(
            &mut client,
            b"@PJL FSQUERY NAME=\"0:\\nonexistent\"\r\n",
            "@PJL FSQUERY \r\n",
        )
        .await;
        roundtrip(&mut client, b"@PJL ECHO hello@PJL USTATUSOFF", "@PJL ECHO hello").await;
        drop(client);

        handle.await.unwrap();
        assert_eq!(
            sink.events().last(),
            Some(&SessionEvent::ConnectionClosed {
                reason: CloseReason::ClientClosed,
                requests: 3,
            })
        );
    }

    #[tokio::test]
    async fn idle_connection_times_out_without_reply() {
        let sink = Arc::new(MemorySink::new());
        let ctx = context(sink.clone()).with_idle_timeout(Duration::from_millis(50));
        let (mut client, handle) = spawn_session(ctx);

        assert_eq!(handle.await.unwrap(), CloseReason::IdleTimeout);

        // The server end is gone and nothing was ever written.
        let mut buf = Vec::new();
        let n = client.read_to_end(&mut buf).await.unwrap();
        assert_eq!(n, 0);
        assert!(!sink
            .events()
            .iter()
            .any(|e| matches!(e, SessionEvent::ResponseSent { .. })));
    }

    #[tokio::test]
    async fn empty_request_closes_session() {
        let sink = Arc::new(MemorySink::new());
        let (mut client, handle) = spawn_session(context(sink.clone()));

        client.write_all(b"\x1b%-12345X\r\n").await.unwrap();
        assert_eq!(handle.await.unwrap(), CloseReason::EmptyRequest);

        let mut buf = Vec::new();
        assert_eq!(client.read_to_end(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn invalid_utf8_is_fatal_but_recorded() {
        let sink = Arc::new(MemorySink::new());
        let (mut client, handle) = spawn_session(context(sink.clone()));

        client.write_all(&[b'@', 0xff, 0xfe, b'\n']).await.unwrap();
        assert!(matches!(handle.await.unwrap(), CloseReason::DecodeError(_)));

        let events = sink.events();
        assert!(matches!(events[1], SessionEvent::RequestReceived { bytes: 4, .. }));
    }

    #[tokio::test]
    async fn faults_and_unknown_verbs_keep_session_open() {
        let sink = Arc::new(MemorySink::new());
        let (mut client, handle) = spawn_session(context(sink.clone()));

        // Nothing to send back, but the session must survive.
        client
            .write_all(b"@PJL FSQUERY\r\n@PJL SET COPIES=2\r\n")
            .await
            .unwrap();
        roundtrip(
            &mut client,
            b"@PJL INFO STATUS\r\n",
            "@PJL INFO STATUS\r\nCODE=10001\r\nDISPLAY=Ready\r\nONLINE=TRUE\r\n",
        )
        .await;
        drop(client);
        handle.await.unwrap();

        let events = sink.events();
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::HandlerError { verb, .. } if verb == "FSQUERY")));
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::CommandUnknown { verb, .. } if verb == "SET")));
    }

    #[tokio::test]
    async fn panicking_handler_keeps_session_alive() {
        fn handle_broken(_: &Command, _: &Printer) -> Result<String, HandlerError> {
            let trays: Vec<u32> = Vec::new();
            Ok(format!("TRAYS={}", trays[0]))
        }

        let mut dispatcher = Dispatcher::standard();
        dispatcher.register("INFO CONFIG", handle_broken);
        let sink = Arc::new(MemorySink::new());
        let (mut client, handle) =
            spawn_session(context(sink.clone()).with_dispatcher(dispatcher));

        roundtrip(
            &mut client,
            b"@PJL INFO CONFIG\r\n@PJL INFO ID\r\n",
            "@PJL INFO ID\r\nhp LaserJet 4200\r\n\r\n",
        )
        .await;
        roundtrip(&mut client, b"@PJL ECHO again", "@PJL ECHO again").await;
        drop(client);

        assert_eq!(handle.await.unwrap(), CloseReason::ClientClosed);
        let events = sink.events();
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::HandlerError { verb, .. } if verb == "INFO CONFIG")));
        assert_eq!(
            events.last(),
            Some(&SessionEvent::ConnectionClosed {
                reason: CloseReason::ClientClosed,
                requests: 2,
            })
        );
    }

    #[tokio::test]
    async fn sessions_do_not_share_state() {
        let sink = Arc::new(MemorySink::new());
        let ctx = context(sink);
        let (mut a, ha) = spawn_session(ctx.clone());
        let (mut b, hb) = spawn_session(ctx);

        // Attempted mutation in one session is invisible everywhere.
        a.write_all(b"@PJL FSMKDIR NAME=\"0:\\owned\"\r\n").await.unwrap();
        roundtrip(
            &mut b,
            b"@PJL FSQUERY NAME=\"0:\\owned\"\r\n",
            "@PJL FSQUERY \r\n",
        )
        .await;
        roundtrip(
            &mut a,
            b"@PJL FSQUERY NAME=\"0:\\owned\"\r\n",
            "@PJL FSQUERY \r\n",
        )
        .await;

        drop(a);
        drop(b);
        ha.await.unwrap();
        hb.await.unwrap();
    }

    #[tokio::test]
    async fn small_read_buffer_splits_batches() {
        let sink = Arc::new(MemorySink::new());
        let mut ctx = context(sink.clone());
        ctx.recv_buffer_size = 16;
        let (mut client, handle) = spawn_session(ctx);

        // Each 16-byte read frames independently.
        client.write_all(b"@PJL ECHO abcdef@PJL ECHO 123456").await.unwrap();
        let mut reply = vec![0u8; 32];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, b"@PJL ECHO abcdef@PJL ECHO 123456");
        drop(client);
        handle.await.unwrap();
    }
}
