//! Binary entrypoint for the matrixmud CLI.
//!
//! Commands:
//! - `start` - run the line protocol, admin channel and web view
//! - `init` - write a starter `config.toml`
//! - `status` - load the stored world and print a short health report
//! - `admin-passwd` - interactively set the admin channel password (argon2 hashed)
//!
//! See the library crate docs for module-level details: `matrixmud::`.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{info, warn};

use matrixmud::config::Config;
use matrixmud::mud::world::reachable;
use matrixmud::mud::{Game, MudStoreBuilder};
use matrixmud::server::session::{build_argon2, hash_secret};
use matrixmud::server::MudServer;

#[derive(Parser)]
#[command(name = "matrixmud")]
#[command(about = "A multi-user text world set inside the Matrix")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Start {
        /// Override the line protocol listen address
        #[arg(short, long)]
        listen: Option<String>,
    },
    /// Write a default configuration file
    Init,
    /// Load the stored world and report rooms, entities and broken exits
    Status,
    /// Set or update the admin channel password in the config file
    AdminPasswd,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Init writes the config, so there is nothing to load yet.
    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Start { listen } => {
            let mut config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            if let Some(addr) = listen {
                config.server.line_addr = addr;
            }
            info!("Starting matrixmud v{}", env!("CARGO_PKG_VERSION"));
            let server = MudServer::open(config)?;
            server.run().await?;
        }
        Commands::Init => {
            info!("Initializing new configuration");
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Status => {
            let config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            config.validate()?;
            let db_path = config.storage.db_path();
            let store = MudStoreBuilder::new(&db_path).open()?;
            let game = Game::open(store, config.game.settings())?;

            let graph = game.world().exit_graph();
            let reached = reachable(&graph, game.start_room());
            let mut dangling = 0usize;
            for (room, targets) in &graph {
                for target in targets {
                    if !graph.contains_key(target) {
                        dangling += 1;
                        warn!("{} has an exit to missing room {}", room, target);
                    }
                }
            }
            let saved_at = game.store().world_saved_at()?;
            println!("Database:        {}", db_path.display());
            println!("Rooms:           {}", graph.len());
            println!("Reachable:       {} from {}", reached.len(), game.start_room());
            println!("Dangling exits:  {}", dangling);
            println!("Entities:        {}", game.store().list_player_ids()?.len());
            println!(
                "Last world save: {}",
                saved_at.unwrap_or_else(|| "never".to_string())
            );
        }
        Commands::AdminPasswd => {
            let mut config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            println!("Setting admin channel password.");
            // Prompt twice without echo
            let pass1 = rpassword::prompt_password("New password: ")?;
            if pass1.len() < 8 {
                println!("Error: password too short (min 8).");
                return Ok(());
            }
            if pass1.len() > 128 {
                println!("Error: password too long.");
                return Ok(());
            }
            let pass2 = rpassword::prompt_password("Confirm password: ")?;
            if pass1 != pass2 {
                println!("Error: passwords do not match.");
                return Ok(());
            }
            let argon = build_argon2(config.security.argon2.as_ref());
            let hash = match hash_secret(&argon, &pass1) {
                Ok(h) => h,
                Err(e) => {
                    println!("Hash error: {e}");
                    return Ok(());
                }
            };
            config.security.admin_password_hash = Some(hash);
            let serialized = toml::to_string_pretty(&config)?;
            tokio::fs::write(&cli.config, serialized).await?;
            println!("Admin password updated successfully.");
        }
    }

    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity wins over the configured level
    let configured = config
        .as_ref()
        .and_then(|cfg| cfg.logging.level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);
    let base_level = match verbosity {
        0 => configured,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let file = config
        .as_ref()
        .and_then(|cfg| cfg.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });
    let security_path = config.as_ref().and_then(|cfg| cfg.logging.security_file.clone());

    match file {
        Some(f) => {
            let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
            // Mirror to the console only when someone is watching it.
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());

                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }

                if record.target() == "security" {
                    if let Some(ref sec_path) = security_path {
                        if let Ok(mut sf) = std::fs::OpenOptions::new()
                            .create(true)
                            .append(true)
                            .open(sec_path)
                        {
                            let _ = writeln!(sf, "{}", line);
                        }
                    }
                }

                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(|fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
            });
        }
    }
    let _ = builder.try_init();
}
