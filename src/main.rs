use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use glosa::{AppConfig, CommentStore, Disqus, Error, FileStore, MigrationImporter, Overrides, Server};

#[derive(Parser)]
#[command(name = "glosa", version)]
#[command(about = "Self-hosted comment server", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Comment database file (overrides `storage` from the configuration)
    #[arg(long)]
    storage: Option<PathBuf>,

    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    bind: IpAddr,

    #[arg(short, long, default_value_t = 8000)]
    port: u16,

    /// Directory served under /static/
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Test mode: development secret, error details in responses
    #[arg(long, hide = true)]
    test: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Import a Disqus XML export into the comment database
    Import { file: PathBuf },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "glosa=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Error> {
    let overrides = Overrides {
        storage: cli.storage,
        production: cli.test.then_some(false),
    };
    let config = AppConfig::load(cli.config.as_deref(), &overrides)?;
    tracing::debug!(?config, "configuration loaded");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let store = open_store(&config)?;
            let app = glosa::app(config, store)?;

            let mut server = Server::bind(SocketAddr::new(cli.bind, cli.port));
            if let Some(dir) = cli.static_dir {
                server = server.static_files(dir);
            }
            server.serve(app).await
        }
        Command::Import { file } => {
            let path = config.storage.clone().ok_or(Error::MissingStorage)?;
            let store = FileStore::open(&path)?;
            let contents = tokio::fs::read_to_string(&file).await?;

            let summary = tokio::task::spawn_blocking(move || Disqus.import_from(&store, &contents))
                .await
                .map_err(|e| Error::Io(std::io::Error::other(e)))??;
            tracing::info!(
                threads = summary.threads,
                comments = summary.comments,
                storage = %path.display(),
                "import complete"
            );
            Ok(())
        }
    }
}

fn open_store(config: &AppConfig) -> Result<Arc<dyn CommentStore>, Error> {
    match &config.storage {
        Some(path) => {
            let store = FileStore::open(path)?;
            tracing::info!(storage = %path.display(), "comment store opened");
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("no storage configured, comments are kept in memory only");
            Ok(Arc::new(FileStore::in_memory()?))
        }
    }
}
