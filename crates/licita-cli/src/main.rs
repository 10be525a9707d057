mod scan;

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use licita_core::{CountPolicy, RecencySource, ScanConfig, SnapshotNaming};
use licita_ingest::{HistoryExtractor, NoticeAudit, OrgAggregator, TombstoneTally};
use licita_sync::{FeedPager, MirrorOptions};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "licita", version)]
#[command(about = "Ingest procurement feed snapshots", long_about = None)]
struct Cli {
    /// JSON scan configuration; flags below override it
    #[arg(long, global = true, env = "LICITA_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the snapshot files
    #[arg(long, global = true, env = "LICITA_SNAPSHOTS")]
    snapshots: Option<PathBuf>,

    /// Directory for generated outputs
    #[arg(long, global = true, env = "LICITA_OUT")]
    out: Option<PathBuf>,

    #[arg(long, global = true, env = "LICITA_WORKERS")]
    workers: Option<usize>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate contracting organizations into a CSV registry
    Orgs {
        /// CPV prefix to keep (repeatable); replaces the configured set
        #[arg(long = "cpv")]
        cpv: Vec<String>,

        /// Keep every entry regardless of CPV
        #[arg(long, conflicts_with = "cpv")]
        all_cpv: bool,

        #[arg(long, value_enum)]
        recency: Option<Recency>,

        #[arg(long, value_enum)]
        count: Option<Count>,

        #[arg(long, default_value = "organizations.csv")]
        output: String,
    },

    /// Collect every published version of one tender
    History {
        /// Entry ID of the tender
        reference_id: String,

        /// Creation date of the tender; older snapshots end the scan
        #[arg(long)]
        created_at: String,
    },

    /// Tabulate notice types and the folder statuses they appear under
    AuditNotices {
        /// Write the report here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Count withdrawn entries by reason
    Tombstones,

    /// Mirror the live feed into the snapshot directory
    Download {
        #[arg(long, env = "LICITA_FEED_URL")]
        url: String,

        #[arg(long)]
        max_pages: Option<usize>,

        /// Stop before following a next link containing this text
        #[arg(long)]
        stop_marker: Option<String>,

        /// Stop at the first page not updated after this date
        #[arg(long)]
        since: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Recency {
    Updated,
    ContractNotice,
}

#[derive(Clone, Copy, ValueEnum)]
enum Count {
    Distinct,
    Observations,
}

impl Cli {
    fn scan_config(&self) -> anyhow::Result<ScanConfig> {
        let mut config = match &self.config {
            Some(path) => ScanConfig::from_json_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => ScanConfig::default(),
        };
        if let Some(dir) = &self.snapshots {
            config.snapshot_dir = dir.clone();
        }
        if let Some(dir) = &self.out {
            config.output_dir = dir.clone();
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        Ok(config)
    }
}

/// An RFC 3339 instant as given, or a plain date taken as local midnight in
/// the zone snapshot names are stamped in.
fn parse_date(raw: &str, naming: &SnapshotNaming) -> anyhow::Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") else {
        bail!("unrecognised date {raw:?}, expected YYYY-MM-DD or RFC 3339");
    };
    match naming.start_of_day(date) {
        Some(t) => Ok(t),
        None => bail!("{raw} has no midnight in {}", naming.timezone),
    }
}

fn output_path(config: &ScanConfig, name: &str) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("creating {}", config.output_dir.display()))?;
    Ok(config.output_dir.join(name))
}

async fn orgs(
    mut config: ScanConfig,
    cpv: Vec<String>,
    all_cpv: bool,
    recency: Option<Recency>,
    count: Option<Count>,
    output: &str,
) -> anyhow::Result<()> {
    if all_cpv {
        config.cpv_prefixes.clear();
    } else if !cpv.is_empty() {
        config.cpv_prefixes = cpv;
    }
    if let Some(r) = recency {
        config.recency = match r {
            Recency::Updated => RecencySource::Updated,
            Recency::ContractNotice => RecencySource::ContractNotice,
        };
    }
    if let Some(c) = count {
        config.count_policy = match c {
            Count::Distinct => CountPolicy::DistinctEntries,
            Count::Observations => CountPolicy::Observations,
        };
    }

    let path = output_path(&config, output)?;
    let (aggregator, _) = scan::run(&config, OrgAggregator::from_config(&config)).await?;
    let registry = aggregator.into_registry();
    registry.publish_csv(&path)?;
    println!("{} organizations -> {}", registry.len(), path.display());
    Ok(())
}

async fn history(config: ScanConfig, reference_id: String, created_at: &str) -> anyhow::Result<()> {
    let created_at = parse_date(created_at, &config.naming()?)?;
    let extractor = HistoryExtractor::new(reference_id, created_at);
    let (extractor, stats) = scan::run(&config, extractor).await?;
    let history = extractor.into_history();
    let path = history.write_to_dir(&config.output_dir)?;
    println!(
        "{} versions -> {}{}",
        history.fragments.len(),
        path.display(),
        if stats.stopped_early { " (stopped early)" } else { "" }
    );
    Ok(())
}

async fn audit_notices(config: ScanConfig, output: Option<&Path>) -> anyhow::Result<()> {
    let (audit, _) = scan::run(&config, NoticeAudit::new()).await?;
    let report = audit.into_report();
    match output {
        Some(path) => report.publish(path)?,
        None => report
            .write_text(&mut std::io::stdout().lock())
            .context("writing report")?,
    }
    Ok(())
}

async fn tombstones(config: ScanConfig) -> anyhow::Result<()> {
    let (tally, _) = scan::run(&config, TombstoneTally::new()).await?;
    let (distinct, by_reason) = tally.finish();
    let mut stdout = std::io::stdout().lock();
    licita_ingest::tombstones::write_tally(&by_reason, &mut stdout).context("writing tally")?;
    writeln!(stdout, "total: {distinct}")?;
    Ok(())
}

async fn download(
    config: ScanConfig,
    url: String,
    max_pages: Option<usize>,
    stop_marker: Option<String>,
    since: Option<&str>,
) -> anyhow::Result<()> {
    let naming = config.naming()?;
    let options = MirrorOptions {
        max_pages,
        stop_marker,
        since: since.map(|raw| parse_date(raw, &naming)).transpose()?,
    };
    let mut pager = FeedPager::new(url);
    let stats = licita_sync::mirror(
        &mut pager,
        &config.snapshot_dir,
        &naming,
        &options,
        Utc::now(),
    )
    .await?;
    println!(
        "{} pages ({} bytes) -> {} [{:?}]",
        stats.pages,
        stats.bytes,
        config.snapshot_dir.display(),
        stats.stop
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.scan_config()?;
    info!(version = env!("CARGO_PKG_VERSION"), "licita");

    match cli.cmd {
        Commands::Orgs {
            cpv,
            all_cpv,
            recency,
            count,
            output,
        } => orgs(config, cpv, all_cpv, recency, count, &output).await,
        Commands::History {
            reference_id,
            created_at,
        } => history(config, reference_id, &created_at).await,
        Commands::AuditNotices { output } => audit_notices(config, output.as_deref()).await,
        Commands::Tombstones => tombstones(config).await,
        Commands::Download {
            url,
            max_pages,
            stop_marker,
            since,
        } => download(config, url, max_pages, stop_marker, since.as_deref()).await,
    }
}
