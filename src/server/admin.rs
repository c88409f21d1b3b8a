//! Operator console on its own TCP port.
//!
//! Commands here act directly on the session manager and the hub; they
//! skip per-entity rate limiting and gameplay authorization.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{info, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc::unbounded_channel;

use super::connection::{LineReader, ReadOutcome};
use super::session::SessionEvent;
use super::ServerContext;
use crate::logutil::escape_log;
use crate::metrics;

pub const ADMIN_HELP: &[&str] = &[
    "stats              counters and world summary",
    "who                connected and parked entities",
    "kick <name>        save and disconnect an entity",
    "broadcast <text>   announce to every session",
    "save               write the world and every live entity",
    "backup             write a verified backup archive",
    "shutdown           save and stop the server",
    "quit               close this console",
];

#[derive(Debug, Default, PartialEq, Eq)]
pub struct AdminReply {
    pub lines: Vec<String>,
    pub close: bool,
}

impl AdminReply {
    fn text(line: impl Into<String>) -> Self {
        Self {
            lines: vec![line.into()],
            close: false,
        }
    }
}

/// Run one admin command.
pub fn execute(ctx: &ServerContext, line: &str) -> AdminReply {
    let line = line.trim();
    let (keyword, rest) = match line.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword.to_ascii_lowercase(), rest.trim()),
        None => (line.to_ascii_lowercase(), ""),
    };
    match keyword.as_str() {
        "" => AdminReply::default(),
        "help" | "?" => AdminReply {
            lines: ADMIN_HELP.iter().map(|s| s.to_string()).collect(),
            close: false,
        },
        "stats" => {
            let game = &ctx.game;
            let mut lines = metrics::snapshot().lines();
            lines.push(format!(
                "sessions: {} live, {} parked",
                ctx.sessions.live_sessions(),
                ctx.sessions.detached_count()
            ));
            lines.push(format!("rooms: {}", game.world().room_count()));
            lines.push(format!("training instances: {}", game.instances().active_count()));
            lines.push(format!("period: {}", game.clock().current_period().name()));
            AdminReply { lines, close: false }
        }
        "who" => {
            let mut lines = Vec::new();
            for player in ctx.game.registry().snapshot_all() {
                let state = ctx
                    .sessions
                    .state_of(&player.name)
                    .map(|s| format!("{:?}", s))
                    .unwrap_or_else(|| "unbound".to_string());
                lines.push(format!(
                    "{:<16} {:<16} L{:<3} {}/{} hp  {}",
                    player.name, player.current_room, player.level, player.health, player.max_health, state
                ));
            }
            if lines.is_empty() {
                lines.push("Nobody is jacked in.".to_string());
            }
            AdminReply { lines, close: false }
        }
        "kick" => {
            if rest.is_empty() {
                return AdminReply::text("Usage: kick <name>");
            }
            if ctx.sessions.logout(rest, SessionEvent::LoggedOut) {
                ctx.hub.send_line(rest, "You have been disconnected by an operator.");
                ctx.hub.kick(rest);
                ctx.limiter.forget(rest);
                ctx.publish_notices();
                info!(target: "security", "admin kicked {}", escape_log(rest));
                AdminReply::text(format!("Kicked {}.", rest))
            } else {
                AdminReply::text(format!("{} is not connected.", rest))
            }
        }
        "broadcast" | "wall" => {
            if rest.is_empty() {
                return AdminReply::text("Usage: broadcast <text>");
            }
            let delivered = ctx.hub.broadcast(&format!("[Broadcast] {}", rest));
            AdminReply::text(format!("Delivered to {} session(s).", delivered))
        }
        "save" => match ctx.save() {
            Ok(summary) => AdminReply::text(format!(
                "Saved {} rooms and {} entities.",
                summary.rooms, summary.players
            )),
            Err(err) => AdminReply::text(format!("Save failed: {}", err)),
        },
        "backup" => {
            let dir = ctx.config.storage.backup_dir();
            match ctx.game.create_backup(&dir) {
                Ok(meta) => AdminReply::text(format!("Backup {} written ({} bytes).", meta.id, meta.size_bytes)),
                Err(err) => {
                    warn!("backup failed: {}", err);
                    AdminReply::text(format!("Backup failed: {}", err))
                }
            }
        }
        "shutdown" => {
            ctx.request_shutdown();
            AdminReply {
                lines: vec!["Shutting down.".to_string()],
                close: true,
            }
        }
        "quit" | "exit" => AdminReply {
            lines: vec!["Bye.".to_string()],
            close: true,
        },
        _ => AdminReply::text("Unknown admin command. Type 'help'."),
    }
}

/// Serve one admin connection.
pub async fn serve(ctx: Arc<ServerContext>, stream: TcpStream, peer: SocketAddr) {
    let (read_half, mut write_half) = stream.into_split();
    // Admin clients are raw sockets; negotiation replies are dropped.
    let (replies, _ignored) = unbounded_channel();
    let mut reader = LineReader::new(read_half, ctx.config.session.max_line_len);
    info!(target: "security", "admin connection from {}", peer);

    if let Some(phc) = ctx.config.security.admin_password_hash.clone() {
        let _ = write_half.write_all(b"Password: ").await;
        let secret = match reader.next_line(&replies).await {
            Ok(ReadOutcome::Line(secret)) => secret,
            _ => return,
        };
        let checker = Arc::clone(&ctx);
        let ok = tokio::task::spawn_blocking(move || checker.sessions.verify_admin(&phc, &secret))
            .await
            .unwrap_or(false);
        if !ok {
            info!(target: "security", "admin login failed from {}", peer);
            let _ = write_half.write_all(b"Denied.\r\n").await;
            return;
        }
    }
    let _ = write_half.write_all(b"matrixmud admin console. Type 'help'.\r\n").await;

    loop {
        let line = match reader.next_line(&replies).await {
            Ok(ReadOutcome::Line(line)) => line,
            _ => break,
        };
        let worker = Arc::clone(&ctx);
        let reply = match tokio::task::spawn_blocking(move || execute(&worker, &line)).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!("admin command failed: {}", err);
                break;
            }
        };
        let mut out = String::new();
        for line in &reply.lines {
            out.push_str(line);
            out.push_str("\r\n");
        }
        if write_half.write_all(out.as_bytes()).await.is_err() || reply.close {
            break;
        }
    }
    let _ = write_half.shutdown().await;
}
