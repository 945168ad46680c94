use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use speedtest_backend::model::{NetworkMetadata, RunConfig, SpeedTestResult, ANONYMOUS_USER};
use speedtest_backend::service::SpeedTestService;
use speedtest_backend::storage::{self, FileStore};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Parser, Clone)]
#[command(
    name = "speedtest-backend",
    version,
    about = "Network speed test with tiered fallback and per-user history"
)]
pub struct Cli {
    /// JSON file with measurement settings; missing keys keep their defaults
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory results are stored in
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Per-probe latency timeout (e.g. 2s, 500ms)
    #[arg(long, global = true)]
    pub probe_timeout: Option<humantime::Duration>,

    /// Number of parallel workers for multi-connection tests
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    /// Bind to a specific source IP address (e.g., 192.168.10.2)
    #[arg(long, global = true)]
    pub source: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a speed test and save the result
    Run(RunArgs),
    /// List a user's saved results, newest first
    History {
        #[arg(long)]
        user_id: String,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print one saved result as JSON
    Show { id: String },
    /// Delete a saved result owned by the given user
    Delete {
        id: String,
        #[arg(long, default_value = ANONYMOUS_USER)]
        user_id: String,
    },
}

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    /// Use parallel connections spread over the test servers
    #[arg(long)]
    pub multi: bool,

    /// Owner of the result (anonymous if omitted)
    #[arg(long, default_value = "")]
    pub user_id: String,

    /// Client IP recorded with the result
    #[arg(long)]
    pub ip: Option<String>,

    #[arg(long)]
    pub isp: Option<String>,

    #[arg(long)]
    pub country: Option<String>,

    #[arg(long)]
    pub region: Option<String>,

    /// Print JSON result instead of a text summary
    #[arg(long)]
    pub json: bool,

    /// Export results as JSON
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    /// Export results as CSV
    #[arg(long)]
    pub export_csv: Option<PathBuf>,
}

impl RunArgs {
    fn metadata(&self) -> NetworkMetadata {
        [
            ("ip", &self.ip),
            ("isp", &self.isp),
            ("country", &self.country),
            ("region", &self.region),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.clone().map(|v| (k.to_string(), v)))
        .collect()
    }
}

pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args)?;
    let store = FileStore::new(args.data_dir.clone().unwrap_or_else(FileStore::default_dir));
    tracing::debug!(dir = %store.dir().display(), "using result store");
    let service = SpeedTestService::new(cfg, store)?;
    let cfg = service.config();
    tracing::debug!(
        cdn = %cfg.cdn_base_url,
        workers = cfg.workers,
        servers = cfg.servers.len(),
        probe_timeout_ms = cfg.probe_timeout.as_millis() as u64,
        source_ip = cfg.source_ip.as_deref().unwrap_or("-"),
        "measurement settings"
    );

    match &args.command {
        Command::Run(run) => run_test(&service, run).await,
        Command::History { user_id, json } => {
            let results = service.user_history(user_id)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                print_history(&results);
            }
            Ok(())
        }
        Command::Show { id } => {
            let result = service.result(id)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Command::Delete { id, user_id } => {
            service.delete_result(id, user_id)?;
            eprintln!("Deleted: {id}");
            Ok(())
        }
    }
}

/// Build a `RunConfig` from the optional config file and CLI overrides.
pub fn build_config(args: &Cli) -> Result<RunConfig> {
    let mut cfg = match args.config.as_deref() {
        Some(path) => load_config(path)?,
        None => RunConfig::default(),
    };
    if let Some(t) = args.probe_timeout {
        cfg.probe_timeout = Duration::from(t);
    }
    if let Some(w) = args.workers {
        cfg.workers = w;
    }
    if let Some(src) = args.source.as_ref() {
        cfg.source_ip = Some(src.clone());
    }
    Ok(cfg)
}

fn load_config(path: &Path) -> Result<RunConfig> {
    let data = std::fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    serde_json::from_slice(&data).with_context(|| format!("parse config {}", path.display()))
}

async fn run_test(service: &SpeedTestService<FileStore>, args: &RunArgs) -> Result<()> {
    let result = service
        .run_speed_test(&args.user_id, &args.metadata(), args.multi)
        .await
        .context("speed test failed")?;

    handle_exports(args, &result)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&result);
    }
    eprintln!("Saved: {}", result.id);
    Ok(())
}

fn print_summary(r: &SpeedTestResult) {
    println!("Download: {:.2} Mbps", r.download_speed);
    println!("Upload:   {:.2} Mbps", r.upload_speed);
    println!("Ping:     {:.1} ms (jitter {:.2})", r.ping, r.jitter);
    if !r.ip_address.is_empty() || !r.isp.is_empty() {
        let ip = if r.ip_address.is_empty() { "-" } else { &r.ip_address };
        let isp = if r.isp.is_empty() { "-" } else { &r.isp };
        println!("IP/ISP:   {ip} / {isp}");
    }
}

fn print_history(results: &[SpeedTestResult]) {
    if results.is_empty() {
        eprintln!("No results.");
        return;
    }
    println!(
        "{:<26} {:<22} {:>10} {:>10} {:>8} {:>8}",
        "created_at", "id", "down", "up", "ping", "jitter"
    );
    for r in results {
        println!(
            "{:<26} {:<22} {:>10.2} {:>10.2} {:>8.1} {:>8.2}",
            r.created_at
                .replace_nanosecond(0)
                .map(|t| t.to_string())
                .unwrap_or_default(),
            r.id,
            r.download_speed,
            r.upload_speed,
            r.ping,
            r.jitter
        );
    }
}

fn handle_exports(args: &RunArgs, result: &SpeedTestResult) -> Result<()> {
    if let Some(p) = args.export_json.as_deref() {
        storage::export_json(p, result)?;
    }
    if let Some(p) = args.export_csv.as_deref() {
        storage::export_csv(p, std::slice::from_ref(result))?;
    }
    Ok(())
}
