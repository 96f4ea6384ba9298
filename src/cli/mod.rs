pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "dogear")]
#[command(about = "Save articles and enrich them in the background", long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.config/dogear/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Database file, overriding the configured one
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Save a URL and start enrichment
    Save {
        /// URL of the article
        url: String,

        /// Title to use when the page has none
        #[arg(short, long)]
        title: Option<String>,

        /// Owner of the saved item
        #[arg(long)]
        owner: Option<String>,
    },
    /// Process queued jobs until interrupted
    Worker {
        /// Poll interval (e.g., "5s", "1m")
        #[arg(short, long)]
        interval: Option<String>,

        /// Drain due messages once and exit
        #[arg(long)]
        once: bool,
    },
    /// Queue cover generation for an item
    Cover {
        /// Item id or unique id prefix
        item: String,

        /// Regenerate even if a cover exists
        #[arg(short, long)]
        force: bool,
    },
    /// Queue an email sync to the reading device
    Kindle {
        /// Item id or unique id prefix
        item: String,

        /// Send again even if the device copy is current
        #[arg(short, long)]
        force: bool,
    },
    /// Show an item's enrichment state
    Status {
        /// Item id or unique id prefix
        item: String,
    },
    /// List saved items
    List,
    /// Manage push devices
    Device {
        #[command(subcommand)]
        action: DeviceAction,
    },
    /// Send the ready notification for an item now
    Notify {
        /// Item id or unique id prefix
        item: String,

        /// Only notify this device
        #[arg(short, long)]
        device: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum DeviceAction {
    /// Register or update a device
    Register {
        /// Stable device identifier
        device_id: String,

        /// Push token issued to the device
        token: String,

        #[arg(long, default_value = "ios")]
        platform: String,

        /// "sandbox" or "production"
        #[arg(long, default_value = "production")]
        environment: String,

        #[arg(long)]
        bundle_id: Option<String>,

        #[arg(long)]
        app_version: Option<String>,

        #[arg(long)]
        build_number: Option<String>,

        #[arg(long)]
        owner: Option<String>,
    },
    /// Remove a device
    Remove {
        device_id: String,

        #[arg(long)]
        owner: Option<String>,
    },
    /// List registered devices
    List {
        #[arg(long)]
        owner: Option<String>,
    },
}
