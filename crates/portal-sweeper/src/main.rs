use clap::Parser;
use color_eyre::eyre;
use portal_config::Configuration;
use portal_dns::DnsResolver;
use portal_service::{HostnameService, SchemeService, SweepService, SweepSummary};
use std::{env, path::PathBuf, time::Duration};
use tracing::{error, info};
use tracing_subscriber::{
    filter::{LevelFilter, Targets},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

mod notify;

use self::notify::Notifier;

/// Dedicated runner for the portal's periodic verification sweeps
#[derive(Parser)]
#[command(about, author, version)]
struct Args {
    /// Path to the configuration
    #[arg(long, short)]
    config: PathBuf,
}

fn initialise_logging() -> eyre::Result<()> {
    let env_filter = env::var("RUST_LOG")
        .map_err(eyre::Report::from)
        .and_then(|targets| targets.parse().map_err(eyre::Report::from))
        .unwrap_or_else(|_| Targets::default().with_default(LevelFilter::INFO));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .try_init()?;

    Ok(())
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let config = Configuration::load(args.config).await?;

    initialise_logging()?;

    let db_pool = portal_db::connect(&config.database)
        .await
        .map_err(|error| eyre::eyre!(error))?;
    let resolver = DnsResolver::new(&config.dns);

    let hostname_service = HostnameService::builder()
        .db_pool(db_pool.clone())
        .resolver(resolver)
        .build();
    let sweep_service = SweepService::builder()
        .db_pool(db_pool.clone())
        .hostname_service(hostname_service)
        .build();
    let scheme_service = SchemeService::builder().db_pool(db_pool).build();

    let notifier = config.notification.as_ref().map(Notifier::new);

    let new_interval = Duration::from_secs(config.verification.new_sweep_interval_secs);
    let existing_interval = Duration::from_secs(config.verification.existing_sweep_interval_secs);

    info!(
        new_sweep_every_secs = new_interval.as_secs(),
        existing_sweep_every_secs = existing_interval.as_secs(),
        "sweeper started"
    );

    let new_sweep = {
        let sweep_service = sweep_service.clone();
        let scheme_service = scheme_service.clone();

        async move {
            let mut ticker = tokio::time::interval(new_interval);
            loop {
                ticker.tick().await;

                match sweep_service.run_new_hostname_sweep().await {
                    Ok(summary) if summary.verified > 0 => {
                        // Freshly verified hostnames may unblock publication
                        if let Err(error) = scheme_service.publish_accepted().await {
                            error!(%error, "publication pass failed");
                        }
                    }
                    Ok(_) => {}
                    Err(error) => error!(%error, "new-hostname sweep failed"),
                }
            }
        }
    };

    let existing_sweep = {
        let notifier = notifier.clone();

        async move {
            let mut ticker = tokio::time::interval(existing_interval);
            loop {
                ticker.tick().await;

                match sweep_service.run_existing_hostname_sweep().await {
                    Ok(summary) => announce_invalidations(notifier.as_ref(), summary).await,
                    Err(error) => error!(%error, "existing-hostname sweep failed"),
                }
            }
        }
    };

    tokio::join!(new_sweep, existing_sweep);

    Ok(())
}

async fn announce_invalidations(notifier: Option<&Notifier>, summary: SweepSummary) {
    if summary.invalidated == 0 {
        return;
    }

    let Some(notifier) = notifier else { return };

    if let Err(error) = notifier.lost_ownership(summary.invalidated).await {
        // Best effort; the invalidation itself is already persisted
        error!(%error, "failed to deliver invalidation notification");
    }
}
