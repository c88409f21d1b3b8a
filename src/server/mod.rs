//! Network surfaces: the line protocol, the admin console and the web view.
//!
//! [`MudServer`] owns the listeners and background tasks. Everything a
//! connection needs lives in one [`ServerContext`] built once at startup
//! and shared by reference count.
//!
//! ```rust,no_run
//! use matrixmud::config::Config;
//! use matrixmud::server::MudServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     MudServer::open(config)?.run().await
//! }
//! ```

pub mod admin;
pub mod connection;
pub mod hub;
pub mod rate_limit;
pub mod session;
pub mod telnet;
pub mod web;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::metrics;
use crate::mud::dispatch::Event;
use crate::mud::errors::GameResult;
use crate::mud::{Game, MudStoreBuilder, SaveSummary};

pub use hub::{Hub, Outbound};
pub use rate_limit::CommandRateLimiter;
pub use session::{SessionEvent, SessionManager, SessionState};

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

pub struct ServerContext {
    pub config: Config,
    pub game: Arc<Game>,
    pub sessions: SessionManager,
    pub hub: Hub,
    pub limiter: CommandRateLimiter,
    shutdown: watch::Sender<bool>,
    next_connection: AtomicU64,
}

impl ServerContext {
    pub fn new(config: Config, game: Arc<Game>) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            sessions: SessionManager::new(
                Arc::clone(&game),
                config.session.clone(),
                config.server.max_sessions,
                config.security.argon2.as_ref(),
            ),
            hub: Hub::new(Arc::clone(&game)),
            limiter: CommandRateLimiter::new(config.session.commands_per_second),
            game,
            config,
            shutdown,
            next_connection: AtomicU64::new(1),
        })
    }

    pub fn next_connection_id(&self) -> u64 {
        self.next_connection.fetch_add(1, Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Full save with metrics.
    pub fn save(&self) -> GameResult<SaveSummary> {
        match self.game.save_all() {
            Ok(summary) => {
                metrics::inc_saves();
                Ok(summary)
            }
            Err(err) => {
                metrics::inc_save_failures();
                error!("Save failed: {}", err);
                Err(err)
            }
        }
    }

    /// Log out parked entities whose window passed and tell everyone.
    pub fn sweep(&self) -> Vec<String> {
        let expired = self.sessions.expire_detached();
        for name in &expired {
            self.hub
                .publish(&[Event::everyone(format!("{} has left the Matrix.", name))]);
        }
        self.publish_notices();
        expired
    }

    /// Deliver events the game raised outside a command, such as a duel
    /// partner leaving.
    pub fn publish_notices(&self) {
        let notices = self.game.take_notices();
        if !notices.is_empty() {
            self.hub.publish(&notices);
        }
    }
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Pre-bound listeners; `web` and `admin` are optional.
pub struct Listeners {
    pub line: TcpListener,
    pub admin: Option<TcpListener>,
    pub web: Option<TcpListener>,
}

impl Listeners {
    pub async fn bind(config: &Config) -> Result<Self> {
        let line = TcpListener::bind(&config.server.line_addr)
            .await
            .with_context(|| format!("binding line protocol on {}", config.server.line_addr))?;
        let admin = if config.server.admin_addr.is_empty() {
            None
        } else {
            Some(
                TcpListener::bind(&config.server.admin_addr)
                    .await
                    .with_context(|| format!("binding admin channel on {}", config.server.admin_addr))?,
            )
        };
        let web = if config.server.web_addr.is_empty() {
            None
        } else {
            Some(
                TcpListener::bind(&config.server.web_addr)
                    .await
                    .with_context(|| format!("binding web view on {}", config.server.web_addr))?,
            )
        };
        Ok(Self { line, admin, web })
    }
}

pub struct MudServer {
    ctx: Arc<ServerContext>,
}

impl MudServer {
    /// Open the store and load the world. Any load failure is fatal.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.storage.data_dir)
            .with_context(|| format!("creating data dir {}", config.storage.data_dir))?;
        let db_path = config.storage.db_path();
        let store = MudStoreBuilder::new(&db_path)
            .open()
            .with_context(|| format!("opening world database {}", db_path.display()))?;
        let game = Game::open(store, config.game.settings()).context("loading the world")?;
        Ok(Self::with_game(config, Arc::new(game)))
    }

    pub fn with_game(config: Config, game: Arc<Game>) -> Self {
        Self {
            ctx: ServerContext::new(config, game),
        }
    }

    pub fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.ctx)
    }

    /// Bind the configured addresses and serve until Ctrl-C or `shutdown`.
    pub async fn run(self) -> Result<()> {
        let listeners = Listeners::bind(&self.ctx.config).await?;
        let ctx = Arc::clone(&self.ctx);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal");
                ctx.request_shutdown();
            }
        });
        self.serve(listeners).await
    }

    /// Serve on pre-bound listeners until a shutdown is requested.
    pub async fn serve(self, listeners: Listeners) -> Result<()> {
        let ctx = self.ctx;
        info!(
            "'{}' listening on {}",
            ctx.config.server.name,
            listeners.line.local_addr()?
        );
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        tasks.push(tokio::spawn(accept_line(Arc::clone(&ctx), listeners.line)));
        if let Some(admin) = listeners.admin {
            info!("admin channel on {}", admin.local_addr()?);
            tasks.push(tokio::spawn(accept_admin(Arc::clone(&ctx), admin)));
        }
        if let Some(web) = listeners.web {
            info!("web view on {}", web.local_addr()?);
            let app = web::router(Arc::clone(&ctx.game));
            let rx = ctx.shutdown_signal();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = axum::serve(web, app)
                    .with_graceful_shutdown(wait_for_shutdown(rx))
                    .await
                {
                    error!("web view failed: {}", e);
                }
            }));
        }
        tasks.push(tokio::spawn(sweeper(Arc::clone(&ctx))));
        if let Some(every) = ctx.config.game.autosave_interval() {
            tasks.push(tokio::spawn(autosave(Arc::clone(&ctx), every)));
        }

        wait_for_shutdown(ctx.shutdown_signal()).await;
        let result = shutdown(&ctx).await;
        for task in tasks {
            task.abort();
        }
        result
    }
}

/// Drain sessions, snapshot, persist, close storage.
async fn shutdown(ctx: &Arc<ServerContext>) -> Result<()> {
    info!("Shutting down...");
    ctx.hub.broadcast("The Matrix is going down for maintenance. Your progress is being saved.");
    let worker = Arc::clone(ctx);
    let result = tokio::task::spawn_blocking(move || -> Result<SaveSummary> {
        let drained = worker.sessions.logout_all();
        worker.hub.close_all();
        info!("Drained {} session(s)", drained);
        let summary = worker.save();
        worker.game.store().flush()?;
        summary.map_err(anyhow::Error::from)
    })
    .await
    .context("shutdown task panicked")?;
    match result {
        Ok(summary) => {
            info!(
                "Shutdown complete: {} rooms and {} entities saved",
                summary.rooms, summary.players
            );
            Ok(())
        }
        Err(err) => Err(err.context("final save failed")),
    }
}

async fn accept_line(ctx: Arc<ServerContext>, listener: TcpListener) {
    let mut stop = ctx.shutdown_signal();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    metrics::inc_connections_accepted();
                    let _ = stream.set_nodelay(true);
                    tokio::spawn(connection::serve(Arc::clone(&ctx), stream, peer));
                }
                Err(e) => warn!("accept failed: {}", e),
            },
            _ = stop.changed() => break,
        }
    }
    debug!("line listener stopped");
}

async fn accept_admin(ctx: Arc<ServerContext>, listener: TcpListener) {
    let mut stop = ctx.shutdown_signal();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(admin::serve(Arc::clone(&ctx), stream, peer));
                }
                Err(e) => warn!("admin accept failed: {}", e),
            },
            _ = stop.changed() => break,
        }
    }
}

async fn sweeper(ctx: Arc<ServerContext>) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let worker = Arc::clone(&ctx);
        if let Err(e) = tokio::task::spawn_blocking(move || worker.sweep()).await {
            warn!("sweeper task failed: {}", e);
        }
    }
}

async fn autosave(ctx: Arc<ServerContext>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately.
    interval.tick().await;
    loop {
        interval.tick().await;
        let worker = Arc::clone(&ctx);
        match tokio::task::spawn_blocking(move || worker.save()).await {
            Ok(Ok(summary)) => debug!("autosave: {} rooms, {} entities", summary.rooms, summary.players),
            Ok(Err(_)) => {}
            Err(e) => warn!("autosave task failed: {}", e),
        }
    }
}
