/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::debug;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_rustls::TlsConnector;

use crate::config::FtpControlConfig;
use crate::connection::BoxFtpStream;
use crate::error::{FtpCommandError, FtpReplyError, FtpTlsError};
use crate::event::FtpEvent;

mod command;
mod reply;

pub use command::{FtpCommand, FtpTransferType};
pub use reply::FtpReply;

use reply::FtpReplyParser;

/// Shared slot tagging the live data channel so an ABOR in the queue can
/// fail the data path cleanly.
pub(crate) type DataAbortSlot = Arc<Mutex<Option<Arc<AtomicBool>>>>;

struct Request {
    line: String,
    is_abor: bool,
    tx: mpsc::UnboundedSender<Result<FtpReply, FtpCommandError>>,
}

enum ControlOp {
    Send { request: Request, promote: bool },
    UpgradeTls {
        connector: TlsConnector,
        name: ServerName<'static>,
        done: oneshot::Sender<Result<(), FtpTlsError>>,
    },
    End,
    Destroy,
}

/// The replies belonging to one queued command, in arrival order.
/// Preliminary 1xx replies show up here without completing the command;
/// the terminating reply is the last item.
pub(crate) struct FtpReplyStream {
    rx: mpsc::UnboundedReceiver<Result<FtpReply, FtpCommandError>>,
}

impl FtpReplyStream {
    pub(crate) async fn next(&mut self) -> Result<FtpReply, FtpCommandError> {
        match self.rx.recv().await {
            Some(r) => r,
            None => Err(FtpCommandError::SessionClosed),
        }
    }

    /// Skip preliminary replies and return the terminating one.
    pub(crate) async fn terminating(mut self) -> Result<FtpReply, FtpCommandError> {
        loop {
            let reply = self.next().await?;
            if !reply.is_preliminary() {
                return Ok(reply);
            }
        }
    }
}

/// Handle to the dispatcher task owning the control stream.
#[derive(Clone)]
pub(crate) struct FtpControlHandle {
    op_tx: mpsc::UnboundedSender<ControlOp>,
    data_abort: DataAbortSlot,
}

impl FtpControlHandle {
    /// Queue a command and get its lazy reply stream. `promote` inserts
    /// at the queue front; the in-flight command is never displaced.
    /// An ABOR tags the live data channel when the writer loop sends it.
    pub(crate) fn send(&self, cmd: &FtpCommand, promote: bool) -> FtpReplyStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let request = Request {
            line: cmd.to_string(),
            is_abor: cmd.is_abor(),
            tx,
        };
        let _ = self.op_tx.send(ControlOp::Send { request, promote });
        FtpReplyStream { rx }
    }

    pub(crate) fn register_data_channel(&self, flag: Arc<AtomicBool>) {
        *self.data_abort.lock().unwrap() = Some(flag);
    }

    pub(crate) fn clear_data_channel(&self) {
        *self.data_abort.lock().unwrap() = None;
    }

    /// Swap the control stream for its TLS-wrapped self. Must only be
    /// called while no command is queued or in flight.
    pub(crate) async fn upgrade_tls(
        &self,
        connector: TlsConnector,
        name: ServerName<'static>,
    ) -> Result<(), FtpTlsError> {
        let (done, wait) = oneshot::channel();
        if self
            .op_tx
            .send(ControlOp::UpgradeTls { connector, name, done })
            .is_err()
        {
            return Err(FtpTlsError::HandshakeFailed(std::io::Error::other(
                "control channel closed",
            )));
        }
        wait.await.unwrap_or_else(|_| {
            Err(FtpTlsError::HandshakeFailed(std::io::Error::other(
                "control channel closed",
            )))
        })
    }

    /// Let the queue drain, then close.
    pub(crate) fn end(&self) {
        let _ = self.op_tx.send(ControlOp::End);
    }

    /// Tear down immediately without draining.
    pub(crate) fn destroy(&self) {
        let _ = self.op_tx.send(ControlOp::Destroy);
    }
}

struct DispatchState {
    parser: FtpReplyParser,
    queue: VecDeque<Request>,
    in_flight: Option<Request>,
    greeting_tx: Option<oneshot::Sender<FtpReply>>,
    events: mpsc::UnboundedSender<FtpEvent>,
    ending: bool,
    had_error: bool,
}

impl DispatchState {
    fn handle_reply(&mut self, reply: FtpReply) {
        #[cfg(feature = "log-raw-io")]
        crate::debug::log_rsp(reply.code, &reply.text);

        if let Some(tx) = self.greeting_tx.take() {
            if reply.group() == 2 {
                let _ = self.events.send(FtpEvent::Greeting(reply.text.clone()));
            }
            let _ = tx.send(reply);
            return;
        }

        match reply.group() {
            1 => {
                if let Some(request) = self.in_flight.as_ref() {
                    let _ = request.tx.send(Ok(reply));
                } else {
                    debug!("dropping stray preliminary reply {}", reply.code);
                }
            }
            2 | 3 => {
                if let Some(request) = self.in_flight.take() {
                    let _ = request.tx.send(Ok(reply));
                } else {
                    debug!("dropping stray reply {}", reply.code);
                }
            }
            4 | 5 => {
                if let Some(request) = self.in_flight.take() {
                    let _ = request
                        .tx
                        .send(Err(FtpCommandError::from_reply(reply.code, reply.text)));
                } else {
                    let _ = self.events.send(FtpEvent::Error(format!(
                        "unexpected error reply {} {}",
                        reply.code, reply.text
                    )));
                }
            }
            _ => debug!("dropping reply with invalid code {}", reply.code),
        }
    }

    fn fail_all(&mut self, closed_in_flight: impl Fn() -> FtpCommandError) {
        if let Some(request) = self.in_flight.take() {
            let _ = request.tx.send(Err(closed_in_flight()));
        }
        while let Some(request) = self.queue.pop_front() {
            let _ = request.tx.send(Err(FtpCommandError::SessionClosed));
        }
    }
}

/// Spawn the dispatcher task. The returned oneshot resolves with the
/// server greeting (the first reply seen with nothing in flight).
pub(crate) fn spawn_control(
    stream: BoxFtpStream,
    config: FtpControlConfig,
    keepalive: Duration,
    events: mpsc::UnboundedSender<FtpEvent>,
) -> (FtpControlHandle, oneshot::Receiver<FtpReply>) {
    let (op_tx, op_rx) = mpsc::unbounded_channel();
    let (greeting_tx, greeting_rx) = oneshot::channel();
    let data_abort: DataAbortSlot = Arc::new(Mutex::new(None));
    let handle = FtpControlHandle {
        op_tx,
        data_abort: Arc::clone(&data_abort),
    };
    let state = DispatchState {
        parser: FtpReplyParser::new(),
        queue: VecDeque::new(),
        in_flight: None,
        greeting_tx: Some(greeting_tx),
        events,
        ending: false,
        had_error: false,
    };
    tokio::spawn(dispatch_loop(stream, op_rx, config, keepalive, data_abort, state));
    (handle, greeting_rx)
}

async fn dispatch_loop(
    mut stream: BoxFtpStream,
    mut ops: mpsc::UnboundedReceiver<ControlOp>,
    config: FtpControlConfig,
    keepalive: Duration,
    data_abort: DataAbortSlot,
    mut state: DispatchState,
) {
    let max_reply_size = config.max_line_len * config.max_multi_lines;
    let mut buf = vec![0u8; config.max_line_len];
    let mut deadline = Instant::now() + keepalive;
    let mut graceful = false;

    'main: loop {
        // writer side: pop the queue head whenever nothing is in flight
        while state.in_flight.is_none() {
            let Some(request) = state.queue.pop_front() else {
                if state.ending {
                    graceful = true;
                    break 'main;
                }
                break;
            };
            #[cfg(feature = "log-raw-io")]
            crate::debug::log_cmd(&request.line);
            if request.is_abor {
                if let Some(flag) = data_abort.lock().unwrap().as_ref() {
                    flag.store(true, Ordering::Relaxed);
                }
            }
            let wire = format!("{}\r\n", request.line);
            if let Err(e) = stream.write_all(wire.as_bytes()).await {
                let _ = request.tx.send(Err(FtpCommandError::SendFailed(e)));
                state.had_error = true;
                break 'main;
            }
            deadline = Instant::now() + keepalive;
            state.in_flight = Some(request);
        }

        let mut pending_upgrade = None;
        tokio::select! {
            biased;

            op = ops.recv() => match op {
                Some(ControlOp::Send { request, promote }) => {
                    if promote {
                        state.queue.push_front(request);
                    } else {
                        state.queue.push_back(request);
                    }
                    deadline = Instant::now() + keepalive;
                }
                Some(ControlOp::UpgradeTls { connector, name, done }) => {
                    pending_upgrade = Some((connector, name, done));
                }
                Some(ControlOp::End) => state.ending = true,
                Some(ControlOp::Destroy) | None => break 'main,
            },

            r = stream.read(&mut buf) => match r {
                Ok(0) => {
                    if !state.ending && (state.in_flight.is_some() || !state.queue.is_empty()) {
                        state.had_error = true;
                        let _ = state.events.send(FtpEvent::Error(
                            "control connection closed by server".to_string(),
                        ));
                    } else {
                        graceful = state.ending;
                    }
                    state.fail_all(|| FtpReplyError::ConnectionClosed.into());
                    break 'main;
                }
                Ok(n) => {
                    for reply in state.parser.feed(&buf[..n]) {
                        state.handle_reply(reply);
                        deadline = Instant::now() + keepalive;
                    }
                    if state.parser.buffered_len() > max_reply_size {
                        state.had_error = true;
                        state.fail_all(|| FtpReplyError::ReplyTooLarge.into());
                        break 'main;
                    }
                }
                Err(e) => {
                    state.had_error = true;
                    let _ = state.events.send(FtpEvent::Error(format!(
                        "control connection failed: {e}"
                    )));
                    state.fail_all(|| FtpReplyError::ReadFailed(e.kind().into()).into());
                    break 'main;
                }
            },

            _ = tokio::time::sleep_until(deadline) => {
                if state.queue.is_empty() && state.in_flight.is_none() && !state.ending {
                    let (tx, _rx) = mpsc::unbounded_channel();
                    state.queue.push_back(Request {
                        line: FtpCommand::Noop.to_string(),
                        is_abor: false,
                        tx,
                    });
                }
                deadline = Instant::now() + keepalive;
            }
        }

        if let Some((connector, name, done)) = pending_upgrade {
            let plain = std::mem::replace(&mut stream, Box::new(tokio::io::empty()));
            match connector.connect(name, plain).await {
                Ok(tls) => {
                    stream = Box::new(tls);
                    let _ = done.send(Ok(()));
                }
                Err(e) => {
                    let _ = done.send(Err(FtpTlsError::HandshakeFailed(e)));
                    state.had_error = true;
                    break 'main;
                }
            }
        }
    }

    state.fail_all(|| FtpCommandError::SessionClosed);
    let _ = stream.shutdown().await;
    if graceful {
        let _ = state.events.send(FtpEvent::End);
    }
    let _ = state.events.send(FtpEvent::Close {
        had_error: state.had_error,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn start(
        keepalive: Duration,
    ) -> (
        FtpControlHandle,
        oneshot::Receiver<FtpReply>,
        DuplexStream,
        mpsc::UnboundedReceiver<FtpEvent>,
    ) {
        let (client_side, server_side) = duplex(4096);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (handle, greeting) = spawn_control(
            Box::new(client_side),
            FtpControlConfig::default(),
            keepalive,
            events_tx,
        );
        (handle, greeting, server_side, events_rx)
    }

    async fn read_line(server: &mut DuplexStream) -> String {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let n = server.read(&mut byte).await.unwrap();
            assert!(n > 0, "client closed");
            line.push(byte[0]);
            if byte[0] == b'\n' {
                break;
            }
        }
        String::from_utf8(line).unwrap()
    }

    #[tokio::test]
    async fn greeting_then_fifo_commands() {
        let (handle, greeting, mut server, _events) = start(Duration::from_secs(60));
        server.write_all(b"220 ready\r\n").await.unwrap();
        let greeting = greeting.await.unwrap();
        assert_eq!(greeting.code, 220);

        let first = handle.send(&FtpCommand::Syst, false);
        let second = handle.send(&FtpCommand::Pwd, false);

        assert_eq!(read_line(&mut server).await, "SYST\r\n");
        server.write_all(b"215 UNIX Type: L8\r\n").await.unwrap();
        assert_eq!(read_line(&mut server).await, "PWD\r\n");
        server.write_all(b"257 \"/\"\r\n").await.unwrap();

        let r1 = first.terminating().await.unwrap();
        assert_eq!(r1.code, 215);
        let r2 = second.terminating().await.unwrap();
        assert_eq!(r2.code, 257);
    }

    #[tokio::test]
    async fn promoted_request_jumps_queue_but_not_in_flight() {
        let (handle, greeting, mut server, _events) = start(Duration::from_secs(60));
        server.write_all(b"220 ready\r\n").await.unwrap();
        greeting.await.unwrap();

        let first = handle.send(&FtpCommand::Syst, false);
        assert_eq!(read_line(&mut server).await, "SYST\r\n");

        // SYST is now in flight; queue PWD, then promote NOOP past it
        let queued = handle.send(&FtpCommand::Pwd, false);
        let promoted = handle.send(&FtpCommand::Noop, true);

        server.write_all(b"215 UNIX\r\n").await.unwrap();
        assert_eq!(read_line(&mut server).await, "NOOP\r\n");
        server.write_all(b"200 ok\r\n").await.unwrap();
        assert_eq!(read_line(&mut server).await, "PWD\r\n");
        server.write_all(b"257 \"/\"\r\n").await.unwrap();

        first.terminating().await.unwrap();
        assert_eq!(promoted.terminating().await.unwrap().code, 200);
        assert_eq!(queued.terminating().await.unwrap().code, 257);
    }

    #[tokio::test]
    async fn preliminary_reply_does_not_advance_queue() {
        let (handle, greeting, mut server, _events) = start(Duration::from_secs(60));
        server.write_all(b"220 ready\r\n").await.unwrap();
        greeting.await.unwrap();

        let mut retr = handle.send(&FtpCommand::Retr("f".to_string()), false);
        let next = handle.send(&FtpCommand::Noop, false);

        assert_eq!(read_line(&mut server).await, "RETR f\r\n");
        server.write_all(b"150 opening\r\n").await.unwrap();
        let preliminary = retr.next().await.unwrap();
        assert_eq!(preliminary.code, 150);

        // terminating reply for RETR must arrive before NOOP is written
        server.write_all(b"226 done\r\n").await.unwrap();
        assert_eq!(retr.next().await.unwrap().code, 226);
        assert_eq!(read_line(&mut server).await, "NOOP\r\n");
        server.write_all(b"200 ok\r\n").await.unwrap();
        next.terminating().await.unwrap();
    }

    #[tokio::test]
    async fn error_reply_fails_only_that_request() {
        let (handle, greeting, mut server, _events) = start(Duration::from_secs(60));
        server.write_all(b"220 ready\r\n").await.unwrap();
        greeting.await.unwrap();

        let bad = handle.send(&FtpCommand::Cwd("missing".to_string()), false);
        let good = handle.send(&FtpCommand::Noop, false);

        assert_eq!(read_line(&mut server).await, "CWD missing\r\n");
        server.write_all(b"550 no such dir\r\n").await.unwrap();
        assert_eq!(read_line(&mut server).await, "NOOP\r\n");
        server.write_all(b"200 ok\r\n").await.unwrap();

        match bad.terminating().await {
            Err(FtpCommandError::Protocol { code: 550, text }) => {
                assert_eq!(text, "no such dir");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        good.terminating().await.unwrap();
    }

    #[tokio::test]
    async fn keepalive_noop_only_when_idle() {
        let (handle, greeting, mut server, _events) = start(Duration::from_millis(50));
        server.write_all(b"220 ready\r\n").await.unwrap();
        greeting.await.unwrap();

        // busy: SYST stays in flight well past the keepalive interval
        let syst = handle.send(&FtpCommand::Syst, false);
        assert_eq!(read_line(&mut server).await, "SYST\r\n");
        tokio::time::sleep(Duration::from_millis(150)).await;
        server.write_all(b"215 UNIX\r\n").await.unwrap();
        syst.terminating().await.unwrap();

        // idle now: the next line must be an injected NOOP
        assert_eq!(read_line(&mut server).await, "NOOP\r\n");
        server.write_all(b"200 ok\r\n").await.unwrap();
    }

    #[tokio::test]
    async fn unsolicited_error_reply_emits_event() {
        let (_handle, greeting, mut server, mut events) = start(Duration::from_secs(60));
        server.write_all(b"220 ready\r\n").await.unwrap();
        greeting.await.unwrap();

        server.write_all(b"421 going down\r\n").await.unwrap();
        loop {
            match events.recv().await.unwrap() {
                FtpEvent::Greeting(_) => {}
                FtpEvent::Error(msg) => {
                    assert!(msg.contains("421"));
                    break;
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn destroy_fails_pending_requests() {
        let (handle, greeting, mut server, mut events) = start(Duration::from_secs(60));
        server.write_all(b"220 ready\r\n").await.unwrap();
        greeting.await.unwrap();

        let stuck = handle.send(&FtpCommand::Syst, false);
        assert_eq!(read_line(&mut server).await, "SYST\r\n");
        handle.destroy();

        assert!(matches!(
            stuck.terminating().await,
            Err(FtpCommandError::SessionClosed)
        ));
        loop {
            match events.recv().await.unwrap() {
                FtpEvent::Close { had_error } => {
                    assert!(!had_error);
                    break;
                }
                _ => {}
            }
        }
    }
}
