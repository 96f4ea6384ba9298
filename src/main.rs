use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dogear::app::AppContext;
use dogear::cli::{commands, Cli, Commands, DeviceAction};
use dogear::config::Config;
use dogear::daemon::{Daemon, DaemonConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            let mut config = Config::load_from(path)?;
            config.apply_env(|key| std::env::var(key).ok());
            config
        }
        None => Config::load()?,
    };
    if let Some(db) = cli.db {
        config.worker.db_path = Some(db);
    }

    let ctx = AppContext::new(config).context("Failed to initialise dogear")?;

    match cli.command {
        Commands::Save { url, title, owner } => {
            commands::save(&ctx, &url, title, owner.as_deref()).await?;
        }
        Commands::Worker { interval, once } => {
            let mut daemon_config = DaemonConfig::from_worker(&ctx.config.worker, once);
            if let Some(interval) = interval {
                let secs = DaemonConfig::parse_interval(&interval).map_err(anyhow::Error::msg)?;
                daemon_config = daemon_config.with_interval(secs);
            }
            Daemon::new(Arc::new(ctx), daemon_config).run().await?;
        }
        Commands::Cover { item, force } => {
            commands::queue_cover(&ctx, &item, force)?;
        }
        Commands::Kindle { item, force } => {
            commands::queue_kindle(&ctx, &item, force)?;
        }
        Commands::Status { item } => {
            commands::status(&ctx, &item)?;
        }
        Commands::List => {
            commands::list_items(&ctx)?;
        }
        Commands::Device { action } => match action {
            DeviceAction::Register {
                device_id,
                token,
                platform,
                environment,
                bundle_id,
                app_version,
                build_number,
                owner,
            } => {
                commands::register_device(
                    &ctx,
                    &device_id,
                    &token,
                    &platform,
                    &environment,
                    bundle_id,
                    app_version,
                    build_number,
                    owner.as_deref(),
                )?;
            }
            DeviceAction::Remove { device_id, owner } => {
                commands::remove_device(&ctx, &device_id, owner.as_deref())?;
            }
            DeviceAction::List { owner } => {
                commands::list_devices(&ctx, owner.as_deref())?;
            }
        },
        Commands::Notify { item, device } => {
            commands::notify(&ctx, &item, device.as_deref()).await?;
        }
    }

    Ok(())
}
