//! # press-sync CLI (`psync`)
//!
//! ## Usage
//!
//! ```bash
//! psync --config ./config/press-sync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `psync init` | Create the SQLite store |
//! | `psync list-sites` | Show registered sites |
//! | `psync sync-site <id>` | Run one pass for a site |
//! | `psync sync-all-sites` | Run one pass for every site |
//! | `psync force-sync-site <id>` | Forget all mappings and resync from scratch |
//! | `psync force-sync-doc <id> <item>` | Re-create one item's document |
//! | `psync set-post-types <id> <a,b>` | Choose the content types to sync |
//! | `psync open-oauth` | Print the authorization URL |
//! | `psync serve` | Onboarding server plus periodic sync |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use press_sync::progress::EventMode;
use press_sync::{commands, config, logging};

/// press-sync: mirror WordPress.com content into Dify knowledge bases.
#[derive(Parser)]
#[command(name = "psync", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/press-sync.toml")]
    config: PathBuf,

    /// Where sync events go: through the log, as JSON lines on stderr, or
    /// nowhere.
    #[arg(long, global = true, value_enum, default_value = "log")]
    events: EventMode,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store schema. Safe to run repeatedly.
    Init,

    /// List registered sites with their dataset, item count, and watermark.
    ListSites,

    /// Sync one site.
    SyncSite {
        /// WordPress.com blog id.
        site_id: String,
    },

    /// Sync every registered site, one after another. Failed sites are
    /// reported but do not fail the command.
    SyncAllSites,

    /// Clear a site's mapping and watermark, then sync it.
    ///
    /// Every item gets a new document; existing documents are left in the
    /// dataset.
    ForceSyncSite {
        site_id: String,

        /// Only reset; do not sync.
        #[arg(long)]
        reset_only: bool,
    },

    /// Re-create the document of a single item.
    ForceSyncDoc {
        site_id: String,
        item_id: u64,

        /// Only drop the mapping entry; the next sync that sees the item
        /// creates it.
        #[arg(long)]
        remove_only: bool,
    },

    /// Set the content types synced for a site (comma-separated).
    SetPostTypes { site_id: String, types: String },

    /// Print the WordPress.com authorization URL.
    OpenOauth,

    /// Run the onboarding server and the periodic sync.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init_tracing(&cfg.log);
    let reporter = cli.events.reporter();

    match cli.command {
        Commands::Init => commands::run_init(&cfg).await?,
        Commands::ListSites => commands::run_list_sites(&cfg).await?,
        Commands::SyncSite { site_id } => {
            commands::run_sync_site(&cfg, &site_id, reporter).await?
        }
        Commands::SyncAllSites => commands::run_sync_all(&cfg, reporter).await?,
        Commands::ForceSyncSite {
            site_id,
            reset_only,
        } => commands::run_force_sync_site(&cfg, &site_id, reset_only, reporter).await?,
        Commands::ForceSyncDoc {
            site_id,
            item_id,
            remove_only,
        } => {
            commands::run_force_sync_doc(&cfg, &site_id, item_id, remove_only, reporter).await?
        }
        Commands::SetPostTypes { site_id, types } => {
            commands::run_set_post_types(&cfg, &site_id, &types).await?
        }
        Commands::OpenOauth => commands::run_open_oauth(&cfg)?,
        Commands::Serve => commands::run_serve(&cfg, reporter).await?,
    }

    Ok(())
}
