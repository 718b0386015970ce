//! # NerdsIQ CLI (`nerdsiq`)
//!
//! ## Usage
//!
//! ```bash
//! nerdsiq --config ./config/nerdsiq.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `nerdsiq init` | Create the SQLite database and run schema migrations |
//! | `nerdsiq serve` | Start the HTTP API |
//! | `nerdsiq index` | Rebuild the vector collection from the Drive folder |
//! | `nerdsiq user create` | Add a user account |
//! | `nerdsiq user disable` / `enable` | Toggle an account |
//! | `nerdsiq drive watch` | Register a Drive change-notification channel |

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use nerdsiq::drive::{self, DriveClient};
use nerdsiq::{config, db, ingest, logging, migrate, server, users};

/// NerdsIQ: question answering over a team's Google Drive documents.
#[derive(Parser)]
#[command(name = "nerdsiq", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/nerdsiq.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the users, conversations, and
    /// messages tables. Running it again is safe.
    Init,

    /// Start the HTTP API server.
    ///
    /// Requires `OPENAI_API_KEY` and `JWT_SECRET` in the environment.
    Serve,

    /// Rebuild the vector collection from a Drive folder.
    ///
    /// Drops and recreates the collection, then downloads, chunks, embeds,
    /// and uploads every file in the folder.
    Index {
        /// Drive folder id (defaults to `[drive] folder_id`).
        #[arg(long)]
        folder: Option<String>,

        /// Download and chunk only; report counts without touching the index.
        #[arg(long)]
        dry_run: bool,
    },

    /// Manage user accounts.
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Google Drive integration.
    Drive {
        #[command(subcommand)]
        action: DriveAction,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a user.
    Create {
        #[arg(long)]
        email: String,
        /// At least 8 characters.
        #[arg(long)]
        password: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Block a user from logging in.
    Disable {
        #[arg(long)]
        email: String,
    },
    /// Re-enable a disabled user.
    Enable {
        #[arg(long)]
        email: String,
    },
}

#[derive(Subcommand)]
enum DriveAction {
    /// Register (or renew) a 7-day web-hook channel on the folder.
    Watch {
        /// Public HTTPS URL of `/webhooks/drive`.
        #[arg(long)]
        callback_url: String,

        /// Drive folder id (defaults to `[drive] folder_id`).
        #[arg(long)]
        folder: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging.level);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Index { folder, dry_run } => {
            ingest::run_index(&cfg, folder, dry_run).await?;
        }
        Commands::User { action } => {
            let pool = db::connect(&cfg).await?;
            migrate::apply(&pool).await?;
            match action {
                UserAction::Create {
                    email,
                    password,
                    name,
                } => {
                    let user = users::create_user(&pool, &email, &password, name.as_deref()).await?;
                    println!("Created user {} ({})", user.email, user.id);
                }
                UserAction::Disable { email } => {
                    users::set_active(&pool, &email, false).await?;
                    println!("Disabled user {}", email);
                }
                UserAction::Enable { email } => {
                    users::set_active(&pool, &email, true).await?;
                    println!("Enabled user {}", email);
                }
            }
            pool.close().await;
        }
        Commands::Drive { action } => match action {
            DriveAction::Watch {
                callback_url,
                folder,
            } => {
                let folder_id = folder
                    .or_else(|| cfg.drive.folder_id.clone())
                    .ok_or_else(|| anyhow!("No Drive folder: set [drive] folder_id or pass --folder"))?;
                drive::validate_callback_url(&callback_url)?;
                let client = DriveClient::from_service_account_file(&cfg.drive.service_account_file)?;
                let channel = client.watch_folder(&folder_id, &callback_url).await?;
                println!("Watching folder {}", folder_id);
                println!("  channel id: {}", channel.id);
                if let Some(resource_id) = &channel.resource_id {
                    println!("  resource id: {}", resource_id);
                }
                if let Some(expiration) = &channel.expiration {
                    println!("  expiration (ms): {}", expiration);
                }
            }
        },
    }

    Ok(())
}
