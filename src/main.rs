use clap::Parser;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_appender::non_blocking::WorkerGuard;

use txwatch::api::ApiServer;
use txwatch::config::{self, Config};
use txwatch::error::AppError;
use txwatch::pipeline::{Pipeline, PipelineError};
use txwatch::rpc::JsonRpcClient;
use txwatch::shutdown::{terminate_services, wait_for_termination_signal, Stoppable};
use txwatch::subscriptions::SubscriptionRegistry;
use txwatch::tx_index::TransactionIndex;

#[derive(Parser, Debug)]
#[command(name = "txwatchd")]
#[command(about = "Indexes transactions of subscribed addresses from a JSON-RPC node", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "txwatch.toml")]
    config: String,

    /// Overrides node.json_rpc_url and $JSON_RPC_URL
    #[arg(long)]
    json_rpc_url: Option<String>,

    /// First block to index (decimal or 0x-hex); defaults to the chain tip
    #[arg(long, value_parser = parse_height_arg)]
    beginning_height: Option<u64>,

    /// Overrides api.listen_address and $API_PORT
    #[arg(long)]
    listen_addr: Option<String>,

    #[arg(short, long)]
    verbose: bool,

    #[arg(long)]
    generate_config: bool,
}

fn parse_height_arg(raw: &str) -> Result<u64, String> {
    config::parse_height(raw).ok_or_else(|| format!("invalid block height: {}", raw))
}

impl Args {
    fn apply_to(&self, config: &mut Config) {
        if let Some(url) = &self.json_rpc_url {
            config.node.json_rpc_url = url.clone();
        }
        if let Some(height) = self.beginning_height {
            config.pipeline.beginning_height = Some(height);
        }
        if let Some(addr) = &self.listen_addr {
            config.api.listen_address = addr.clone();
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if args.generate_config {
        match Config::default().save_to_file(&args.config) {
            Ok(_) => {
                println!("✅ Generated default config at: {}", args.config);
                return;
            }
            Err(e) => {
                eprintln!("❌ Failed to generate config: {}", e);
                std::process::exit(1);
            }
        }
    }

    let mut config = match Config::load_or_create(&args.config) {
        Ok(cfg) => {
            println!("✓ Loaded configuration from {}", args.config);
            cfg
        }
        Err(e) => {
            eprintln!("❌ Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = config.apply_env_overrides() {
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }
    args.apply_to(&mut config);
    if let Err(e) = config.validate() {
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }

    let _log_guard = setup_logging(&config.logging, args.verbose);

    let version = env!("CARGO_PKG_VERSION");
    let git_hash = option_env!("GIT_HASH").unwrap_or("unknown");
    let build_date = option_env!("BUILD_DATE").unwrap_or("unknown");

    println!("\n🚀 txwatch v{} ({})", version, git_hash);
    println!("  └─ Build: {}", build_date);
    println!("═══════════════════════════════════════════════════════");
    println!("📡 Node: {}", config.node.json_rpc_url);
    match config.pipeline.beginning_height {
        Some(h) => println!("  └─ Beginning height: {}", h),
        None => println!("  └─ Beginning height: chain tip"),
    }
    println!("🌐 API: {}", config.api.full_listen_address());
    println!();

    match run(config).await {
        Ok(()) => tracing::info!("👋 Stopped cleanly, bye"),
        Err(e) => {
            tracing::error!("❌ {}", e);
            std::process::exit(1);
        }
    }
}

async fn run(config: Config) -> Result<(), AppError> {
    let client = Arc::new(JsonRpcClient::new(config.node.json_rpc_url.clone())?);
    let pipeline = Arc::new(Pipeline::new(
        client,
        Arc::new(TransactionIndex::new()),
        Arc::new(SubscriptionRegistry::new()),
        config.pipeline.scan_policy(),
    ));
    let mut errors = pipeline.take_errors()?;

    pipeline.start(config.pipeline.beginning_height).await?;

    let api = Arc::new(ApiServer::new(pipeline.clone()));
    let services: Vec<Arc<dyn Stoppable>> = vec![pipeline.clone(), api.clone()];

    let outcome = match api.start(&config.api.full_listen_address()).await {
        Ok(_) => wait_for_exit(&mut errors).await,
        Err(e) => Err(e.into()),
    };

    let stopped = terminate_services(&services, config.shutdown.deadline()).await;
    outcome?;
    stopped?;
    Ok(())
}

/// Resolve on SIGINT/SIGTERM (Ok) or on a fatal pipeline error (Err).
/// Non-fatal pipeline errors are logged and waiting continues.
async fn wait_for_exit(errors: &mut UnboundedReceiver<PipelineError>) -> Result<(), AppError> {
    let signal = wait_for_termination_signal();
    tokio::pin!(signal);

    loop {
        tokio::select! {
            res = &mut signal => {
                match res {
                    Ok(name) => tracing::info!("🛑 {} received, shutting down", name),
                    Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
                }
                return Ok(());
            }
            Some(err) = errors.recv() => {
                if err.is_fatal() {
                    tracing::error!("💀 Pipeline died: {}", err);
                    return Err(err.into());
                }
                tracing::warn!("Pipeline reported: {}", err);
            }
        }
    }
}

/// Install the global subscriber. The returned guard flushes the
/// non-blocking writer on drop, so it must live until exit.
fn setup_logging(config: &config::LoggingConfig, verbose: bool) -> WorkerGuard {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, EnvFilter, Layer};

    let level = if verbose { "trace" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let to_file = config.output == "file";
    let (writer, guard) = if to_file {
        let path = std::path::Path::new(&config.file_path);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));
        let file_name = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| "txwatch.log".to_string());
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, file_name))
    } else {
        tracing_appender::non_blocking(std::io::stdout())
    };

    // journald stamps its own time and host
    let under_journald = !to_file
        && (std::env::var("JOURNAL_STREAM").is_ok() || std::env::var("INVOCATION_ID").is_ok());

    let layer = if config.format == "json" {
        fmt::layer().json().with_writer(writer).boxed()
    } else {
        let compact = fmt::layer()
            .compact()
            .with_target(false)
            .with_ansi(!to_file)
            .with_writer(writer);
        if under_journald {
            compact.without_time().boxed()
        } else {
            compact.with_timer(CustomTimer::new()).boxed()
        }
    };

    tracing_subscriber::registry().with(filter).with(layer).init();
    guard
}

/// UTC timestamp plus the short hostname, for logs gathered from several boxes
struct CustomTimer {
    hostname: String,
}

impl CustomTimer {
    fn new() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        let short = hostname.split('.').next().unwrap_or(&hostname).to_string();
        Self { hostname: short }
    }
}

impl tracing_subscriber::fmt::time::FormatTime for CustomTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(w, "{} [{}]", now.format("%Y-%m-%d %H:%M:%S%.3f"), self.hostname)
    }
}
