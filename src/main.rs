use std::{net::SocketAddr, path::PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info, warn};

use polls_server::{
    app::{create_router, AppState},
    config::Config,
    db::Database,
    fixtures::{self, LoadSummary},
    middleware::init_tracing,
    models::CreateUserRequest,
};

#[derive(Parser)]
#[command(name = "polls-server")]
#[command(about = "Online polls service", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API (default)
    Runserver {
        /// Address to listen on (defaults to 0.0.0.0:$PORT)
        #[arg(long, value_name = "ADDR")]
        addr: Option<SocketAddr>,

        /// Skip applying the schema on startup
        #[arg(long)]
        no_migrate: bool,
    },

    /// Apply the database schema
    Migrate,

    /// Load Django-style JSON fixtures
    Loaddata {
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,
    },

    /// Create a user account
    Createuser {
        #[arg(value_name = "USERNAME")]
        username: String,

        #[arg(long)]
        password: String,

        #[arg(long)]
        email: Option<String>,

        /// Allow the user to create polls
        #[arg(long)]
        staff: bool,
    },

    /// Validate the configuration and exit
    Check,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Load configuration from environment
    let config = Config::from_env();

    // Initialize structured logging
    let debug = config.as_ref().map(|c| c.debug).unwrap_or(false);
    if let Err(e) = init_tracing(debug) {
        eprintln!("Failed to initialize tracing: {}", e);
        std::process::exit(1);
    }

    let config = match config {
        Ok(config) => {
            info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    let command = cli.command.unwrap_or(Command::Runserver {
        addr: None,
        no_migrate: false,
    });

    if let Err(e) = run(command, config).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(command: Command, config: Config) -> anyhow::Result<()> {
    match command {
        Command::Check => {
            println!("Configuration OK");
            println!("  database:      {}", config.database.redacted());
            println!("  allowed hosts: {}", config.allowed_hosts.join(", "));
            println!("  debug:         {}", config.debug);
            Ok(())
        }
        Command::Migrate => {
            let database = connect(&config).await?;
            database.migrate().await.context("Failed to run database migrations")?;
            Ok(())
        }
        Command::Loaddata { files } => {
            let database = connect(&config).await?;
            let mut total = LoadSummary::default();
            for path in &files {
                let objects = fixtures::read_fixture(path)?;
                let summary = database
                    .load_fixture(&objects)
                    .await
                    .with_context(|| format!("Failed to load fixture {}", path.display()))?;
                total.merge(summary);
            }
            println!(
                "Installed {} object(s) from {} fixture(s): {} users, {} questions, {} choices, {} votes ({} skipped)",
                total.total(),
                files.len(),
                total.users,
                total.questions,
                total.choices,
                total.votes,
                total.skipped
            );
            Ok(())
        }
        Command::Createuser { username, password, email, staff } => {
            let database = connect(&config).await?;
            let mut request = CreateUserRequest::new(username, password);
            request.email = email;
            request.is_staff = staff;
            let user = database.create_user(request).await?;
            println!("Created user {} (id {})", user.username, user.id);
            Ok(())
        }
        Command::Runserver { addr, no_migrate } => serve(config, addr, no_migrate).await,
    }
}

/// Open the pool and wait for the database to accept queries.
async fn connect(config: &Config) -> anyhow::Result<Database> {
    info!("Connecting to {}", config.database.redacted());
    let database = Database::connect_lazy(config.database.clone())?;
    database
        .wait_until_ready(config.wait)
        .await
        .context("Database is not reachable")?;
    info!("Database connection established");
    Ok(database)
}

async fn serve(config: Config, addr: Option<SocketAddr>, no_migrate: bool) -> anyhow::Result<()> {
    let database = connect(&config).await?;

    if !no_migrate {
        database.migrate().await.context("Failed to run database migrations")?;
    }

    match database.purge_expired_sessions(Utc::now()).await {
        Ok(purged) if purged > 0 => info!("Purged {} expired sessions", purged),
        Ok(_) => {}
        Err(e) => warn!("Failed to purge expired sessions: {}", e),
    }

    let app = create_router(AppState::new(&config, database));

    let addr = addr.unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], config.port)));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to address {}", addr))?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
/// Listens for SIGTERM and SIGINT signals
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal, initiating graceful shutdown");
        },
        _ = terminate => {
            info!("Received SIGTERM signal, initiating graceful shutdown");
        },
    }
}
