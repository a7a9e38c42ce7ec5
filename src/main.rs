use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use script_manager::{api, config::Config, engine::Engine};

#[derive(Parser)]
#[command(name = "scriptmgr")]
#[command(about = "Assign library scripts to supervised projects")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Serve {
        /// Port for HTTP API
        #[arg(short, long, default_value = "8000")]
        port: u16,

        /// Address to bind
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        #[command(flatten)]
        dirs: DirArgs,
    },
    /// Print the health summary of all projects and exit
    Health {
        #[command(flatten)]
        dirs: DirArgs,
    },
}

/// Overrides for the directories normally taken from the environment.
#[derive(clap::Args)]
struct DirArgs {
    #[arg(long)]
    library_dir: Option<PathBuf>,
    #[arg(long)]
    projects_dir: Option<PathBuf>,
    #[arg(long)]
    state_dir: Option<PathBuf>,
}

impl DirArgs {
    fn into_config(self) -> Config {
        let mut config = Config::from_env();
        if let Some(dir) = self.library_dir {
            config.library_dir = dir;
        }
        if let Some(dir) = self.projects_dir {
            config.projects_dir = dir;
        }
        if let Some(dir) = self.state_dir {
            config.state_dir = dir;
        }
        config
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "script_manager=debug,tower_http=debug".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn serve(host: &str, port: u16, config: Config) -> anyhow::Result<()> {
    tracing::info!(
        "Library: {}, projects: {}, state: {}",
        config.library_dir.display(),
        config.projects_dir.display(),
        config.state_dir.display()
    );

    let engine = Engine::open(config)?;
    let app = api::create_router(engine);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", host, port)).await?;
    tracing::info!("Script manager listening on http://{}:{}", host, port);

    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Some(Commands::Serve { port, host, dirs }) => {
            serve(&host, port, dirs.into_config()).await?;
        }
        Some(Commands::Health { dirs }) => {
            let engine = Engine::open(dirs.into_config())?;
            let summary = engine.health_summary()?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        None => {
            serve("0.0.0.0", 8000, Config::from_env()).await?;
        }
    }

    Ok(())
}
