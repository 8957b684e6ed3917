//! tessera: chunked upload and verified download for a content-addressed
//! storage network
//!
//! Commands:
//!   upload <file>                    - fragment, address and replicate a file
//!   download --root R... | --manifest M --output P
//!                                    - fetch fragments, verify each, reassemble
//!   root <file>                      - print fragment roots offline
//!   nodes [--check]                  - list configured nodes as the selector ranks them
//!   config show                      - display current configuration

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tessera_chunks::{hash_file, FragmentReader, RootId};
use tessera_core::config::TesseraConfig;
use tessera_core::{FinalityRequirement, SelectionMode, TrustFilter};
use tessera_storage::{
    is_healthy, transport_from_config, NodeCredentials, OpendalTransport, StaticNodeSelector,
};
use tessera_transfer::{
    ProgressFn, RetrievalVerifier, SessionStatus, TransferManifest, TransferOrchestrator,
    TransferSettings,
};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "tessera",
    version,
    about = "Chunked transfer client for content-addressed storage",
    long_about = "tessera: upload large files as replicated, content-addressed fragments and download them with per-fragment verification"
)]
struct Cli {
    /// Path to tessera.toml configuration file
    #[arg(long, short = 'c', env = "TESSERA_CONFIG", default_value = "tessera.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [log].level
    #[arg(long, env = "TESSERA_LOG")]
    log: Option<String>,

    /// Log format; overrides [log].format
    #[arg(long, env = "TESSERA_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload a file as fragments
    Upload {
        /// Local file to upload
        file: PathBuf,

        /// Write the session report (JSON) here, whatever the outcome
        #[arg(long)]
        report: Option<PathBuf>,

        /// Write the download manifest (JSON) here on success
        #[arg(long)]
        manifest: Option<PathBuf>,

        #[command(flatten)]
        policy: PolicyArgs,
    },

    /// Download and verify fragments into a file
    Download {
        /// Fragment root, in order; repeat for multi-fragment files
        #[arg(long = "root", required_unless_present = "manifest", conflicts_with = "manifest")]
        roots: Vec<RootId>,

        /// Manifest written by `upload --manifest`
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Output file
        #[arg(long, short = 'o')]
        output: PathBuf,
    },

    /// Print fragment roots of a local file without touching the network
    Root {
        file: PathBuf,

        /// Fragment size in bytes (default: [transfer].fragment_size)
        #[arg(long)]
        fragment_size: Option<u64>,
    },

    /// List configured storage nodes in selection order
    Nodes {
        /// Probe each node for reachability
        #[arg(long)]
        check: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
}

/// Per-invocation overrides of the replication policy and fragmenting
#[derive(Args, Debug, Default)]
struct PolicyArgs {
    /// Fragment size in bytes
    #[arg(long)]
    fragment_size: Option<u64>,

    /// Distinct nodes that must hold each fragment
    #[arg(long)]
    replicas: Option<u32>,

    #[arg(long)]
    finality: Option<FinalityArg>,

    #[arg(long)]
    trust: Option<TrustArg>,

    #[arg(long)]
    selection: Option<SelectionArg>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FinalityArg {
    Submitted,
    Confirmed,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TrustArg {
    TrustedOnly,
    AllowDiscovered,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SelectionArg {
    MinLatency,
    RoundRobin,
}

impl PolicyArgs {
    fn apply(&self, config: &mut TesseraConfig) {
        if let Some(size) = self.fragment_size {
            config.transfer.fragment_size = size;
        }
        if let Some(replicas) = self.replicas {
            config.replication.replicas = Some(replicas);
        }
        if let Some(finality) = self.finality {
            config.replication.finality = match finality {
                FinalityArg::Submitted => FinalityRequirement::Submitted,
                FinalityArg::Confirmed => FinalityRequirement::Confirmed,
            };
        }
        if let Some(trust) = self.trust {
            config.replication.trust = match trust {
                TrustArg::TrustedOnly => TrustFilter::TrustedOnly,
                TrustArg::AllowDiscovered => TrustFilter::AllowDiscovered,
            };
        }
        if let Some(selection) = self.selection {
            config.replication.selection = match selection {
                SelectionArg::MinLatency => SelectionMode::MinLatency,
                SelectionArg::RoundRobin => SelectionMode::RoundRobin,
            };
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_exists = cli.config.exists();
    let mut config = load_config(&cli.config).await?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, format);
    if !config_exists {
        warn!("config file not found: {}  (using defaults)", cli.config.display());
    }
    debug!(version = env!("CARGO_PKG_VERSION"), config = %cli.config.display(), "tessera starting");

    match cli.command {
        Commands::Upload {
            file,
            report,
            manifest,
            policy,
        } => {
            policy.apply(&mut config);
            cmd_upload(&config, &file, report.as_deref(), manifest.as_deref()).await
        }
        Commands::Download {
            roots,
            manifest,
            output,
        } => cmd_download(&config, roots, manifest.as_deref(), &output).await,
        Commands::Root {
            file,
            fragment_size,
        } => cmd_root(&config, &file, fragment_size).await,
        Commands::Nodes { check } => cmd_nodes(&config, check).await,
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

async fn load_config(path: &Path) -> Result<TesseraConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))
    } else {
        Ok(TesseraConfig::default())
    }
}

// ── Network from config + environment credentials ─────────────────────────────

/// Node credentials from environment variables.
///
/// Reads AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY (standard S3 env vars),
/// falling back to TESSERA_ACCESS_KEY_ID and TESSERA_SECRET_ACCESS_KEY.
fn credentials_from_env() -> Result<NodeCredentials> {
    let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
        .or_else(|_| std::env::var("TESSERA_ACCESS_KEY_ID"))
        .context(
            "node credentials not set\n\
             Set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY environment variables.\n\
             Example:\n\
             \texport AWS_ACCESS_KEY_ID=your-key\n\
             \texport AWS_SECRET_ACCESS_KEY=your-secret",
        )?;
    let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
        .or_else(|_| std::env::var("TESSERA_SECRET_ACCESS_KEY"))
        .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
    Ok(NodeCredentials {
        access_key_id,
        secret_access_key,
    })
}

fn build_network(
    config: &TesseraConfig,
) -> Result<(Arc<StaticNodeSelector>, Arc<OpendalTransport>)> {
    let creds = credentials_from_env()?;
    let transport =
        transport_from_config(&config.network, &creds).context("building node transport")?;
    let selector = StaticNodeSelector::from_config(&config.network);
    Ok((Arc::new(selector), Arc::new(transport)))
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            token.cancel();
        }
    });
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template(
            "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

// ── `tessera upload` ──────────────────────────────────────────────────────────

async fn cmd_upload(
    config: &TesseraConfig,
    path: &Path,
    report: Option<&Path>,
    manifest_out: Option<&Path>,
) -> Result<()> {
    let settings = TransferSettings::from_config(config).context("invalid transfer settings")?;
    let (selector, transport) = build_network(config)?;

    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    let size = file
        .metadata()
        .await
        .with_context(|| format!("reading metadata: {}", path.display()))?
        .len();

    println!(
        "Uploading {} ({}) in {} fragments, {} replica(s), {:?} finality",
        path.display(),
        fmt_bytes(size),
        fmt_bytes(settings.fragment_size as u64),
        settings.policy.replicas,
        settings.policy.finality,
    );

    let pb = make_progress_bar(size, "upload");
    let pb_clone = pb.clone();
    let progress: ProgressFn = Box::new(move |done: u64, _read: u64, msg: &str| {
        pb_clone.set_position(done);
        pb_clone.set_message(msg.to_string());
    });

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let orchestrator =
        TransferOrchestrator::new(selector, transport, settings).with_progress(progress);
    let session = orchestrator
        .transfer(tokio::io::BufReader::new(file), &cancel)
        .await
        .context("transfer rejected before start")?;

    if let Some(report_path) = report {
        tokio::fs::write(report_path, session.to_json()?)
            .await
            .with_context(|| format!("writing report: {}", report_path.display()))?;
        info!(path = %report_path.display(), "session report written");
    }

    match session.status() {
        SessionStatus::Completed => {
            pb.finish_with_message("done".to_string());
            println!();
            println!("Upload complete:");
            println!("  session:   {}", session.id());
            println!("  bytes:     {}", fmt_bytes(session.total_bytes()));
            println!("  fragments: {}", session.records().len());
            for record in session.records() {
                println!(
                    "  [{:>4}] root: {}  replicas: {}",
                    record.fragment_index, record.root, record.replication_achieved
                );
            }
            if let Some(manifest_path) = manifest_out {
                let file_name = path.file_name().map(|n| n.to_string_lossy().to_string());
                let manifest = TransferManifest::from_session(&session, file_name)?;
                tokio::fs::write(manifest_path, manifest.to_bytes()?)
                    .await
                    .with_context(|| format!("writing manifest: {}", manifest_path.display()))?;
                println!("  manifest:  {}", manifest_path.display());
            }
            Ok(())
        }
        SessionStatus::Failed {
            index,
            kind,
            reason,
        } => {
            pb.abandon_with_message("failed".to_string());
            anyhow::bail!(
                "upload failed at fragment {index} ({kind:?}): {reason}\n\
                 {} fragment(s) committed before the failure",
                session.records().len()
            )
        }
        SessionStatus::Cancelled { index } => {
            pb.abandon_with_message("cancelled".to_string());
            anyhow::bail!("upload cancelled; fragments from {index} on were not committed")
        }
        SessionStatus::InProgress => anyhow::bail!("transfer returned an unfinished session"),
    }
}

// ── `tessera download` ────────────────────────────────────────────────────────

async fn cmd_download(
    config: &TesseraConfig,
    roots: Vec<RootId>,
    manifest_path: Option<&Path>,
    output: &Path,
) -> Result<()> {
    let (roots, expected) = match manifest_path {
        Some(path) => {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("reading manifest: {}", path.display()))?;
            let manifest = TransferManifest::from_bytes(&bytes)
                .with_context(|| format!("parsing manifest: {}", path.display()))?;
            (manifest.roots, Some(manifest.total_size))
        }
        None => (roots, None),
    };

    let (selector, transport) = build_network(config)?;
    let verifier = RetrievalVerifier::new(selector, transport)
        .with_retry(config.network.retry_policy())
        .with_prefetch(config.transfer.fragment_workers);

    println!("Downloading {} fragment(s) → {}", roots.len(), output.display());

    let mut partial = output.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);
    let mut out = tokio::fs::File::create(&partial)
        .await
        .with_context(|| format!("creating {}", partial.display()))?;

    let pb = make_spinner("download");
    pb.set_message("fetching and verifying...".to_string());

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let result = verifier.retrieve_into(&roots, &mut out, &cancel).await;
    drop(out);
    let outcome = match result {
        Ok(written) => match expected {
            Some(expected) if written != expected => Err(anyhow::anyhow!(
                "downloaded {written} bytes but the manifest declares {expected}"
            )),
            _ => Ok(written),
        },
        Err(e) if e.is_cancelled() => Err(anyhow::Error::new(e).context("download cancelled")),
        Err(e) => Err(anyhow::Error::new(e).context("download failed")),
    };
    let written = match outcome {
        Ok(written) => written,
        Err(e) => {
            pb.abandon_with_message("failed".to_string());
            discard_partial(&partial).await;
            return Err(e);
        }
    };

    tokio::fs::rename(&partial, output)
        .await
        .with_context(|| format!("moving download into place: {}", output.display()))?;

    pb.finish_with_message("done".to_string());
    println!();
    println!("Downloaded:");
    println!("  local:  {}", output.display());
    println!("  bytes:  {}", fmt_bytes(written));

    Ok(())
}

async fn discard_partial(partial: &Path) {
    if let Err(e) = tokio::fs::remove_file(partial).await {
        warn!(path = %partial.display(), "removing partial download: {e}");
    }
}

// ── `tessera root` ────────────────────────────────────────────────────────────

async fn cmd_root(config: &TesseraConfig, path: &Path, fragment_size: Option<u64>) -> Result<()> {
    let fragment_size = fragment_size.unwrap_or(config.transfer.fragment_size);
    let fragment_size =
        usize::try_from(fragment_size).context("fragment size exceeds platform limits")?;

    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    let mut reader = FragmentReader::new(tokio::io::BufReader::new(file), fragment_size)?;

    println!("{:>6}  {:>14}  {:>10}  root", "index", "offset", "length");
    while let Some(fragment) = reader
        .next_fragment()
        .await
        .with_context(|| format!("reading {}", path.display()))?
    {
        println!(
            "{:>6}  {:>14}  {:>10}  {}",
            fragment.index,
            fragment.offset,
            fragment.len(),
            fragment.root()
        );
    }
    println!(
        "{} fragment(s), {}",
        reader.next_index(),
        fmt_bytes(reader.bytes_read())
    );

    let whole = path.to_path_buf();
    let file_root = tokio::task::spawn_blocking(move || hash_file(&whole))
        .await
        .context("hashing task panicked")??;
    println!("file root: {file_root}");
    Ok(())
}

// ── `tessera nodes` ───────────────────────────────────────────────────────────

async fn cmd_nodes(config: &TesseraConfig, check: bool) -> Result<()> {
    let selector = StaticNodeSelector::from_config(&config.network);
    let ranked = selector.rank(config.replication.selection);
    if ranked.is_empty() {
        println!("No usable storage nodes configured ([[network.nodes]] in the config file)");
        return Ok(());
    }

    let transport = if check {
        let creds = credentials_from_env()?;
        Some(transport_from_config(&config.network, &creds).context("building node transport")?)
    } else {
        None
    };

    println!(
        "{} node(s), {:?} order, {:?}:",
        ranked.len(),
        config.replication.selection,
        config.replication.trust
    );
    for node in &ranked {
        let admitted = if config.replication.trust.admits(node.trust_tier) {
            ""
        } else {
            "  (excluded by trust filter)"
        };
        let health = match &transport {
            Some(t) => {
                if is_healthy(t, node).await {
                    "  ok"
                } else {
                    "  unreachable"
                }
            }
            None => "",
        };
        println!(
            "  {:<40} {:<10} {:>6}ms  shards {}/{}{health}{admitted}",
            node.url,
            format!("{:?}", node.trust_tier).to_lowercase(),
            node.latency.as_millis(),
            node.shard_config.shard_id,
            node.shard_config.num_shards,
        );
    }
    Ok(())
}

// ── `tessera config show` ─────────────────────────────────────────────────────

fn cmd_config_show(config: &TesseraConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    if let Err(e) = config.validate() {
        println!("# warning: {e}");
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
