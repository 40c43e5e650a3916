//! Fairway CLI - fetch, query, session and cache tools.
//!
//! # Usage
//!
//! ```bash
//! # Fetch a resource through the resilient cache
//! fairway fetch "rest/v1/courses?select=*"
//!
//! # Query a collection
//! fairway query check_ins --eq user_id=42 --order created_at.desc
//!
//! # Sign in (falls back to demo accounts when the provider is unreachable)
//! fairway sign-in -e golfer@example.com
//!
//! # Sweep expired cache entries
//! fairway cache maintain
//! ```
//!
//! # Commands
//!
//! - `fetch` - Fetch a resource
//! - `query` - Query a collection
//! - `sign-in`, `sign-up`, `sign-out`, `whoami` - Session management
//! - `cache` - Clear or sweep the cache

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use fairway_client::auth::SignUpRequest;
use fairway_client::error::Result;
use fairway_client::{ClientConfig, FairwayClient};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "fairway")]
#[command(author, version, about = "Fairway client tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a resource through the cache
    Fetch {
        /// Resource path relative to the API URL
        path: String,

        #[command(flatten)]
        args: commands::fetch::FetchArgs,
    },
    /// Query a collection
    Query(commands::fetch::QueryArgs),
    /// Sign in with email and password
    SignIn {
        #[arg(short, long)]
        email: String,

        #[arg(short, long, env = "FAIRWAY_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account
    SignUp {
        #[arg(short, long)]
        email: String,

        #[arg(short, long, env = "FAIRWAY_PASSWORD", hide_env_values = true)]
        password: String,

        #[arg(long, default_value = "")]
        first_name: String,

        #[arg(long, default_value = "")]
        last_name: String,

        #[arg(short, long, default_value = "")]
        username: String,
    },
    /// Sign out
    SignOut,
    /// Show the signed-in golfer
    Whoami,
    /// Manage the cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Remove every cached entry
    Clear,
    /// Sweep expired entries and trim to the soft limit
    Maintain,
}

/// Initialize Sentry error tracking.
///
/// Returns a guard that must be held for the lifetime of the process.
/// If `SENTRY_DSN` is not configured, returns `None` and Sentry is disabled.
fn init_sentry(config: &ClientConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

fn init_tracing() {
    // Defaults to info for our crates if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "fairway_client=info,fairway_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            init_tracing();
            tracing::error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    // Sentry must be initialized before the tracing subscriber
    let _sentry_guard = init_sentry(&config);
    init_tracing();

    let client = match FairwayClient::from_config(config) {
        Ok(client) => client,
        Err(e) => {
            e.capture();
            return ExitCode::FAILURE;
        }
    };
    let _tasks = client.start_background_tasks();

    match run(&client, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            e.capture();
            ExitCode::FAILURE
        }
    }
}

async fn run(client: &FairwayClient, command: Commands) -> Result<()> {
    match command {
        Commands::Fetch { path, args } => commands::fetch::resource(client, &path, &args).await?,
        Commands::Query(args) => commands::fetch::collection(client, &args).await?,
        Commands::SignIn { email, password } => {
            commands::auth::sign_in(client, &email, &password).await?;
        }
        Commands::SignUp {
            email,
            password,
            first_name,
            last_name,
            username,
        } => {
            let request = SignUpRequest {
                email,
                password,
                first_name,
                last_name,
                username,
            };
            commands::auth::sign_up(client, &request).await?;
        }
        Commands::SignOut => commands::auth::sign_out(client).await?,
        Commands::Whoami => commands::auth::whoami(client).await,
        Commands::Cache { action } => match action {
            CacheAction::Clear => commands::cache::clear(client),
            CacheAction::Maintain => commands::cache::maintain(client),
        },
    }
    Ok(())
}
