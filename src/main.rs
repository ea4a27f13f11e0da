use anyhow::Result;
use clap::{Parser, Subcommand};
use proxy_sieve::{
    pipeline,
    proxy::{ProxyCrawler, ProxyParser, ProxySource, ProxyType},
    Config, ProbeBackend,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Collects proxies from public feeds and keeps only the working ones
#[derive(Parser)]
#[command(name = "proxy-sieve")]
#[command(about = "Collects proxies from public feeds and keeps only the working ones")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Number of concurrent probes
    #[arg(short = 'n', long, global = true)]
    concurrency: Option<usize>,

    /// Probe timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Probing backend
    #[arg(long, value_enum, global = true)]
    backend: Option<ProbeBackend>,

    /// Directory for run state and published lists
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every source, validate all candidates and publish the results
    Run,
    /// Fetch and parse sources, then export the deduplicated candidates
    Crawl {
        /// Feed URLs to crawl instead of the configured sources
        #[arg(short, long)]
        url: Vec<String>,
        /// Protocol assumed for entries of `--url` feeds
        #[arg(short = 't', long, default_value = "http")]
        proxy_type: String,
        /// Also save the candidates as HOST:PORT lines
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Parse proxies from a local file
    Parse {
        /// Input file containing proxies
        input: PathBuf,
        /// Output file for parsed proxies
        #[arg(long)]
        save: Option<PathBuf>,
        /// Protocol assumed for entries without a prefix
        #[arg(short = 't', long)]
        proxy_type: Option<String>,
    },
    /// Validate proxies from a local file
    Check {
        /// Input file containing proxies
        input: PathBuf,
        /// Protocol assumed for entries without a prefix
        #[arg(short = 't', long, default_value = "http")]
        proxy_type: String,
    },
}

impl Cli {
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(timeout) = self.timeout {
            config.probe_timeout_secs = timeout;
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.load_config()?;

    match cli.command {
        Commands::Run => {
            let summary = pipeline::run(&config).await?;
            println!(
                "Results: {} working, {} failed ({} probed, {} from cache)",
                summary.working,
                summary.failed,
                summary.probed(),
                summary.cache_hits()
            );
        }
        Commands::Crawl {
            url,
            proxy_type,
            save,
        } => {
            let sources = if url.is_empty() {
                pipeline::configured_sources(&config)?
            } else {
                let ptype: ProxyType = proxy_type.parse()?;
                url.iter().map(|u| ProxySource::new(u, ptype)).collect()
            };

            let crawler = ProxyCrawler::with_config(config.crawler_config())?;
            let merged = pipeline::collect_candidates(&crawler, &sources).await;
            let publisher = config.publisher();
            publisher.export_all(&merged.unique).await?;

            println!("\nTotal unique proxies: {}", merged.len());
            println!("Exported to {:?}", publisher.csv_path());

            if let Some(path) = save {
                ProxyParser::save_to_file(&merged.unique, &path)?;
                println!("Saved proxies to {:?}", path);
            }
        }
        Commands::Parse {
            input,
            save,
            proxy_type,
        } => {
            let hint = proxy_type.as_deref().map(str::parse::<ProxyType>).transpose()?;
            let parsed = ProxyParser::parse_file(&input, hint)?;

            println!(
                "Parsed {} proxies from {:?} ({} skipped, {} rejected)",
                parsed.proxies.len(),
                input,
                parsed.skipped,
                parsed.diagnostics.len()
            );
            for diag in &parsed.diagnostics {
                eprintln!("  line {}: {} ({})", diag.line_number, diag.raw, diag.reason);
            }

            if let Some(output_path) = save {
                ProxyParser::save_to_file(&parsed.proxies, &output_path)?;
                println!("Saved parsed proxies to {:?}", output_path);
            } else {
                for proxy in &parsed.proxies {
                    println!("{}", proxy);
                }
            }
        }
        Commands::Check { input, proxy_type } => {
            let ptype: ProxyType = proxy_type.parse()?;
            let parsed = ProxyParser::parse_file(&input, Some(ptype))?;
            let candidates = proxy_sieve::merge(parsed.proxies).unique;

            println!("Loaded {} proxies from {:?}", candidates.len(), input);
            println!(
                "Checking with {} workers, timeout: {}s",
                config.concurrency, config.probe_timeout_secs
            );

            let own = pipeline::own_address(&config).await?;
            let summary = pipeline::validate(&config, &candidates, &own, config.prober()).await?;
            println!(
                "Results: {} working, {} failed",
                summary.working, summary.failed
            );
            println!("Working lists written to {:?}", config.output_dir);
        }
    }

    Ok(())
}
