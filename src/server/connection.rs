//! One line-protocol connection: login, then the command loop.
//!
//! Each connection is a reader task (this module's [`serve`]) and a writer
//! task joined by an unbounded channel of [`Outbound`] frames. The reader
//! never holds a game lock across an await; commands run on the blocking
//! pool one at a time, so a session's commands execute in arrival order.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::timeout_at;

use super::hub::Outbound;
use super::session::{validate_name, Login, SessionEvent, SessionState};
use super::telnet::{self, IacParser};
use super::ServerContext;
use crate::logutil::{escape_log, mask_secret, preview_line};
use crate::metrics;
use crate::mud::dispatch::{Event, Scope};
use crate::mud::errors::{GameError, TimeoutKind};

const READ_CHUNK: usize = 1024;

/// Splits a telnet byte stream into lines.
pub struct LineReader<R> {
    inner: R,
    parser: IacParser,
    buf: Vec<u8>,
    lines: VecDeque<String>,
    max_len: usize,
}

#[derive(Debug)]
pub enum ReadOutcome {
    Line(String),
    Eof,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R, max_len: usize) -> Self {
        Self {
            inner,
            parser: IacParser::new(),
            buf: Vec::new(),
            lines: VecDeque::new(),
            max_len,
        }
    }

    /// Next complete line with CR and IAC sequences removed. Negotiation
    /// replies go to `replies`. A line over the limit is an error.
    pub async fn next_line(&mut self, replies: &UnboundedSender<Outbound>) -> io::Result<ReadOutcome> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(line) = self.lines.pop_front() {
                return Ok(ReadOutcome::Line(line));
            }
            let n = self.inner.read(&mut chunk).await?;
            if n == 0 {
                return Ok(ReadOutcome::Eof);
            }
            let (data, reply) = self.parser.parse(&chunk[..n]);
            if !reply.is_empty() {
                let _ = replies.send(Outbound::Telnet(reply));
            }
            for byte in data {
                if byte == b'\n' {
                    let raw = std::mem::take(&mut self.buf);
                    let text = String::from_utf8_lossy(&raw);
                    self.lines.push_back(text.trim_end_matches('\r').to_string());
                } else {
                    self.buf.push(byte);
                    if self.buf.len() > self.max_len {
                        return Err(io::Error::new(io::ErrorKind::InvalidData, "line too long"));
                    }
                }
            }
        }
    }
}

/// Drain frames to the socket until `Close` or a write error.
pub async fn write_frames<W: AsyncWrite + Unpin>(mut writer: W, mut rx: UnboundedReceiver<Outbound>) {
    while let Some(frame) = rx.recv().await {
        let result = match frame {
            Outbound::Line(text) => {
                let mut bytes = text.replace('\n', "\r\n").into_bytes();
                bytes.extend_from_slice(b"\r\n");
                writer.write_all(&bytes).await
            }
            Outbound::EchoOff => writer.write_all(&telnet::ECHO_OFF).await,
            Outbound::EchoOn => writer.write_all(&telnet::ECHO_ON).await,
            Outbound::Telnet(bytes) => writer.write_all(&bytes).await,
            Outbound::Close => {
                let _ = writer.flush().await;
                let _ = writer.shutdown().await;
                break;
            }
        };
        if result.is_err() {
            break;
        }
    }
}

fn line(tx: &UnboundedSender<Outbound>, text: impl Into<String>) {
    let _ = tx.send(Outbound::Line(text.into()));
}

fn lines(tx: &UnboundedSender<Outbound>, texts: &[String]) {
    for text in texts {
        line(tx, text.clone());
    }
}

fn announce(name: &str, text: String) -> Event {
    Event {
        scope: Scope::Everyone,
        text,
        exclude: Some(name.to_string()),
    }
}

/// Serve one accepted TCP connection to completion.
pub async fn serve(ctx: Arc<ServerContext>, stream: TcpStream, peer: SocketAddr) {
    let connection = ctx.next_connection_id();
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = unbounded_channel();
    let writer = tokio::spawn(write_frames(write_half, rx));
    let mut reader = LineReader::new(read_half, ctx.config.session.max_line_len);

    debug!("connection {} from {}", connection, peer);
    let mut state = SessionState::Connecting;
    let login = login(&ctx, &mut reader, &tx, &mut state, peer).await;
    if let Some(login) = login {
        active(&ctx, &mut reader, &tx, &mut state, connection, login).await;
    }
    let _ = tx.send(Outbound::Close);
    drop(tx);
    let _ = writer.await;
    debug!("connection {} from {} closed ({:?})", connection, peer, state);
}

async fn login<R: AsyncRead + Unpin>(
    ctx: &Arc<ServerContext>,
    reader: &mut LineReader<R>,
    tx: &UnboundedSender<Outbound>,
    state: &mut SessionState,
    peer: SocketAddr,
) -> Option<Login> {
    let cfg = &ctx.config.session;
    line(tx, format!("=== {} ===", ctx.config.server.name));
    if !ctx.config.server.motd.is_empty() {
        line(tx, ctx.config.server.motd.clone());
    }
    let _ = state.on(SessionEvent::Greeted);
    let deadline = tokio::time::Instant::now() + state.timeout(cfg).unwrap_or(cfg.login_timeout());

    let mut failures = 0;
    while failures < cfg.max_login_attempts {
        line(tx, "Enter your name (or 'reconnect <token>'):");
        let answer = match read_before(reader, tx, deadline).await {
            Ok(Some(answer)) => answer,
            Ok(None) => {
                let _ = state.on(SessionEvent::Disconnected);
                return None;
            }
            Err(timed_out) => {
                if timed_out {
                    line(tx, GameError::Timeout(TimeoutKind::Login).to_string());
                    let _ = state.on(SessionEvent::TimedOut);
                } else {
                    let _ = state.on(SessionEvent::Disconnected);
                }
                return None;
            }
        };
        let answer = answer.trim().to_string();

        if let Some(token) = answer
            .strip_prefix("reconnect ")
            .or_else(|| answer.strip_prefix("RECONNECT "))
        {
            match ctx.sessions.reconnect(token) {
                Ok(login) => {
                    metrics::inc_reconnects();
                    let _ = state.on(SessionEvent::Reconnected);
                    return Some(login);
                }
                Err(err) => {
                    info!(target: "security", "reconnect from {} rejected: {}", peer, err);
                    line(tx, err.to_string());
                    failures += 1;
                    continue;
                }
            }
        }

        let name = match validate_name(&answer) {
            Ok(name) => name.to_string(),
            Err(err) => {
                line(tx, err.to_string());
                failures += 1;
                continue;
            }
        };

        let _ = tx.send(Outbound::EchoOff);
        line(tx, "Password:");
        let secret = read_before(reader, tx, deadline).await;
        let _ = tx.send(Outbound::EchoOn);
        line(tx, "");
        let secret = match secret {
            Ok(Some(secret)) => secret,
            Ok(None) | Err(false) => {
                let _ = state.on(SessionEvent::Disconnected);
                return None;
            }
            Err(true) => {
                line(tx, GameError::Timeout(TimeoutKind::Login).to_string());
                let _ = state.on(SessionEvent::TimedOut);
                return None;
            }
        };
        debug!("login attempt {} from {} secret={}", escape_log(&name), peer, mask_secret(&secret));

        let sessions = Arc::clone(ctx);
        let attempt = tokio::task::spawn_blocking(move || sessions.sessions.authenticate(&name, &secret)).await;
        match attempt {
            Ok(Ok(login)) => {
                metrics::inc_logins();
                let _ = state.on(SessionEvent::Authenticated);
                return Some(login);
            }
            Ok(Err(err)) => {
                metrics::inc_auth_failures();
                line(tx, err.to_string());
                failures += 1;
            }
            Err(join) => {
                warn!("authentication task failed: {}", join);
                line(tx, "Internal error, try again.");
                failures += 1;
            }
        }
    }
    info!(target: "security", "{} closed after {} failed logins", peer, failures);
    line(tx, "Too many failed attempts. Goodbye.");
    let _ = state.on(SessionEvent::LoggedOut);
    None
}

/// `Ok(None)` on EOF, `Err(true)` on timeout, `Err(false)` on a read error.
async fn read_before<R: AsyncRead + Unpin>(
    reader: &mut LineReader<R>,
    tx: &UnboundedSender<Outbound>,
    deadline: tokio::time::Instant,
) -> Result<Option<String>, bool> {
    match timeout_at(deadline, reader.next_line(tx)).await {
        Err(_) => Err(true),
        Ok(Ok(ReadOutcome::Line(text))) => Ok(Some(text)),
        Ok(Ok(ReadOutcome::Eof)) => Ok(None),
        Ok(Err(err)) => {
            debug!("read failed: {}", err);
            Err(false)
        }
    }
}

enum Ending {
    Quit,
    Idle,
    Dropped,
    Closed,
}

async fn active<R: AsyncRead + Unpin>(
    ctx: &Arc<ServerContext>,
    reader: &mut LineReader<R>,
    tx: &UnboundedSender<Outbound>,
    state: &mut SessionState,
    connection: u64,
    login: Login,
) {
    let name = login.name.clone();
    let game = Arc::clone(&ctx.game);
    ctx.hub.register(&name, connection, tx.clone());

    if login.created {
        line(tx, format!("Welcome to the Matrix, {}.", name));
    } else {
        line(tx, format!("Welcome back, {}.", name));
    }
    line(
        tx,
        format!(
            "Your reconnection token is {}. If you drop, type 'reconnect <token>' at the name prompt.",
            login.token
        ),
    );
    if login.resumed {
        if let Some(room) = game.registry().room_of(&name) {
            ctx.hub.publish(&[Event::room(&room, format!("{}'s signal returns.", name), &name)]);
        }
    } else {
        ctx.hub.publish(&[announce(&name, format!("{} has entered the Matrix.", name))]);
    }
    lines(tx, &game.handle(&name, "look").lines);

    let idle = state
        .timeout(&ctx.config.session)
        .unwrap_or(ctx.config.session.idle_timeout());
    let ending = loop {
        let deadline = tokio::time::Instant::now() + idle;
        let read = tokio::select! {
            read = read_before(reader, tx, deadline) => read,
            _ = tx.closed() => break Ending::Closed,
        };
        let input = match read {
            Ok(Some(input)) => input,
            Ok(None) | Err(false) => break Ending::Dropped,
            Err(true) => break Ending::Idle,
        };
        if input.trim().is_empty() {
            continue;
        }
        if !ctx.limiter.check(&name) {
            metrics::inc_commands_throttled();
            line(tx, GameError::Throttled.to_string());
            continue;
        }
        metrics::inc_commands_executed();
        debug!("{}> {}", name, preview_line(&input));

        let started = Instant::now();
        let worker = Arc::clone(&game);
        let actor = name.clone();
        let response = match tokio::task::spawn_blocking(move || worker.handle(&actor, &input)).await {
            Ok(response) => response,
            Err(join) => {
                warn!("command task for {} failed: {}", name, join);
                line(tx, "Internal error.");
                continue;
            }
        };
        debug!("{} command took {:?}", name, started.elapsed());
        lines(tx, &response.lines);
        ctx.hub.publish(&response.events);
        ctx.publish_notices();
        if response.quit {
            break Ending::Quit;
        }
    };

    ctx.hub.unregister(&name, connection);
    ctx.limiter.forget(&name);
    match ending {
        Ending::Quit => {
            let _ = state.on(SessionEvent::LoggedOut);
            ctx.sessions.logout(&name, SessionEvent::LoggedOut);
            ctx.hub.publish(&[announce(&name, format!("{} has left the Matrix.", name))]);
            ctx.publish_notices();
        }
        Ending::Idle => {
            line(tx, GameError::Timeout(TimeoutKind::Idle).to_string());
            let _ = state.on(SessionEvent::TimedOut);
            ctx.sessions.logout(&name, SessionEvent::TimedOut);
            ctx.hub.publish(&[announce(&name, format!("{} has left the Matrix.", name))]);
            ctx.publish_notices();
        }
        Ending::Dropped | Ending::Closed => {
            // A kick or shutdown logs the entity out before closing us.
            if ctx.sessions.state_of(&name).is_none() {
                let _ = state.on(SessionEvent::LoggedOut);
                return;
            }
            let _ = state.on(SessionEvent::Disconnected);
            let room = game.registry().room_of(&name);
            if ctx.sessions.detach(&name).is_some() {
                if let Some(room) = room {
                    ctx.hub
                        .publish(&[Event::room(&room, format!("{}'s signal is lost.", name), &name)]);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reader_splits_lines_and_strips_telnet() {
        let input: &[u8] = &[
            b'l', b'o', telnet::IAC, telnet::DO, 3, b'o', b'k', b'\r', b'\n', b'n', b'\n',
        ];
        let (tx, mut rx) = unbounded_channel();
        let mut reader = LineReader::new(input, 64);
        assert!(matches!(reader.next_line(&tx).await.unwrap(), ReadOutcome::Line(l) if l == "look"));
        assert!(matches!(reader.next_line(&tx).await.unwrap(), ReadOutcome::Line(l) if l == "n"));
        assert!(matches!(reader.next_line(&tx).await.unwrap(), ReadOutcome::Eof));
        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Telnet(vec![telnet::IAC, telnet::WONT, 3])
        );
    }

    #[tokio::test]
    async fn overlong_lines_are_rejected() {
        let input = vec![b'a'; 100];
        let (tx, _rx) = unbounded_channel();
        let mut reader = LineReader::new(input.as_slice(), 10);
        let err = reader.next_line(&tx).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn writer_frames_lines_and_echo_control() {
        let (tx, rx) = unbounded_channel();
        tx.send(Outbound::Line("hello".into())).unwrap();
        tx.send(Outbound::EchoOff).unwrap();
        tx.send(Outbound::Close).unwrap();
        tx.send(Outbound::Line("never".into())).unwrap();
        let mut out = Vec::new();
        write_frames(&mut out, rx).await;
        let mut expected = b"hello\r\n".to_vec();
        expected.extend_from_slice(&telnet::ECHO_OFF);
        assert_eq!(out, expected);
    }
}
