use clap::Parser;
use color_eyre::Result;
use eyre::eyre;
use std::{
    num::NonZeroU32,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use syncflux::{
    config::AppConfig,
    parse_config,
    parse_config_dir,
    round::CollectionUnit,
    scheduler::{
        RoundCount,
        RunStatus,
        Scheduler,
    },
    sink::{
        InfluxSink,
        PointSink,
    },
    source::SyncthingSource,
};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
    Layer,
};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Report Syncthing device connectivity and folder completion to InfluxDB.")]
struct Args {
    /// Path to configuration file (yaml). Defaults to syncflux.yml.
    #[arg(short, long, env = "SYNCFLUX_CONFIG", conflicts_with = "config_dir")]
    config: Option<PathBuf>,

    /// Configuration directory; all .yml files in it are merged.
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Number of reporting rounds. Use -1 to run indefinitely.
    #[arg(short = 'n', long, default_value_t = 1, allow_hyphen_values = true)]
    count: i64,

    /// Wait between rounds, e.g. "60s" or "5m".
    #[arg(short, long, default_value = "60s", value_parser = humantime::parse_duration)]
    wait: Duration,

    /// Suppress all messages except errors.
    #[arg(short, long, conflicts_with = "verbose")]
    silent: bool,

    /// Be verbose.
    #[arg(short, long)]
    verbose: bool,

    /// Stop after the first round with a failed delivery. The default is to
    /// keep reporting rounds despite failures.
    #[arg(long)]
    halt_on_send_error: bool,
}

impl Args {
    fn round_count(&self) -> Result<RoundCount> {
        match self.count {
            0 => Err(eyre!("round count cannot be zero")),
            n if n < 0 => Ok(RoundCount::Forever),
            n => {
                let n = u32::try_from(n).map_err(|_| eyre!("round count {n} is too large"))?;
                Ok(RoundCount::Finite(NonZeroU32::new(n).ok_or_else(|| eyre!("round count cannot be zero"))?))
            }
        }
    }

    fn load_config(&self) -> Result<AppConfig> {
        if let Some(dir) = &self.config_dir {
            return parse_config_dir(dir);
        }
        let path = self.config.clone().unwrap_or_else(|| PathBuf::from("syncflux.yml"));
        parse_config(&path)
    }
}

fn init_logging(silent: bool, verbose: bool) {
    color_eyre::install().expect("color_eyre init");
    let default_filter = if silent {
        "syncflux=error"
    } else if verbose {
        "syncflux=debug"
    } else {
        "syncflux=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());
    tracing_subscriber::registry()
        .with(fmt::layer().with_filter(filter))
        .with(tracing_error::ErrorLayer::default())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.silent, args.verbose);

    let rounds = args.round_count()?;
    if args.wait.is_zero() {
        return Err(eyre!("wait time must be positive"));
    }
    let config = args.load_config()?;
    config.validate()?;

    let sinks: Vec<Arc<dyn PointSink>> = config
        .influxes
        .values()
        .map(|sink| InfluxSink::new(sink.clone()).map(|sink| Arc::new(sink) as Arc<dyn PointSink>))
        .collect::<Result<_>>()?;

    let units = config
        .syncthings
        .values()
        .map(|source| -> Result<Arc<CollectionUnit>> {
            let client = SyncthingSource::new(source.clone())?;
            Ok(Arc::new(CollectionUnit::new(
                Arc::new(client),
                sinks.clone(),
                source.tags.clone(),
                config.measurements.clone(),
            )))
        })
        .collect::<Result<Vec<_>>>()?;

    info!(
        sources = config.syncthings.len(),
        sinks = config.influxes.len(),
        wait = %humantime::format_duration(args.wait),
        "starting collection"
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("termination requested, stopping at the next round boundary");
            signal_cancel.cancel();
        }
    });

    let scheduler = Scheduler::new(units, args.wait, rounds, args.halt_on_send_error);
    match scheduler.run(cancel).await {
        RunStatus::Completed { rounds } => {
            info!(rounds, "all rounds attempted");
            Ok(())
        }
        RunStatus::Cancelled { rounds } => {
            info!(rounds, "stopped by cancellation");
            Ok(())
        }
        RunStatus::Halted { rounds } => Err(eyre!("halted after a delivery failure (round {rounds})")),
    }
}
