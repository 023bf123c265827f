mod report;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    ombc_bridge::{DefaultFetcher, InstallOptions, Materializer},
    tracing::debug,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(
    name = "ombc",
    version,
    about = "Install Claude Code plugin marketplaces into an OpenCode project"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project root holding the managed `.opencode/` directory.
    #[arg(long, global = true, env = "OMBC_PROJECT")]
    project: Option<PathBuf>,

    /// Config file (overrides discovery).
    #[arg(long, global = true, env = "OMBC_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "error")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Install a marketplace, or one plugin from it.
    Install {
        /// `owner/repo`, a git URL, or a local directory.
        source: String,
        /// Install only this plugin.
        plugin: Option<String>,
        /// Overwrite paths owned by other marketplaces (user files are always protected).
        #[arg(long)]
        force: bool,
    },
    /// Remove everything a marketplace installed.
    Uninstall { name: String },
    /// Reinstall installed marketplaces from their recorded sources.
    Update {
        /// Update only this marketplace.
        name: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// List installed marketplaces.
    List,
}

/// Logs go to stderr so reports on stdout stay clean.
fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let project = match &cli.project {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let config = match &cli.config {
        Some(path) => ombc_config::load_config(path)?,
        None => ombc_config::discover_and_load(&project),
    };
    debug!(version = env!("CARGO_PKG_VERSION"), project = %project.display(), "ombc starting");

    let fetcher = DefaultFetcher::new(config.fetch.clone());
    let materializer = Materializer::new(&project, config);

    match cli.command {
        Commands::Install {
            source,
            plugin,
            force,
        } => {
            let options = InstallOptions {
                force,
                subpackage_filter: plugin,
            };
            let summary = materializer.install(&source, &options, &fetcher).await?;
            for conflict in &summary.conflicts {
                eprintln!("{conflict}");
            }
            println!("{}", report::install_report(&summary));
        },
        Commands::Uninstall { name } => {
            if materializer.uninstall(&name)? {
                println!("Uninstalled {name}");
            } else {
                eprintln!("\"{name}\" is not installed");
            }
        },
        Commands::Update { name, force } => {
            let summary = materializer.update(name.as_deref(), force, &fetcher).await;
            println!("{}", report::update_report(&summary));
            if !summary.failed.is_empty() {
                anyhow::bail!("{} marketplace(s) failed to update", summary.failed.len());
            }
        },
        Commands::List => {
            println!("{}", report::list_report(&materializer.list()));
        },
    }

    Ok(())
}
