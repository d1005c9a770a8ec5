//! Bazaar CLI - inspect and edit the persisted cart.
//!
//! Every invocation opens its own storage origin on the file-backed store
//! and reads the saved cart when it starts. Change broadcasts stay inside
//! one process, so a concurrent shell only sees another shell's edits on its
//! next invocation.
//!
//! # Usage
//!
//! ```bash
//! # Show the cart
//! bz-cli show
//! bz-cli show --json
//!
//! # Add a line (refused if it would mix fulfillment contexts)
//! bz-cli add -s deep-clean -n "Deep clean" -p 45.00 -q 2
//! bz-cli add -s plumbing -n Plumbing -p 80 --mode direct --provider p-7 --replace
//!
//! # Change or drop a line
//! bz-cli set-qty -s deep-clean 3
//! bz-cli remove -s deep-clean
//!
//! # Empty the cart
//! bz-cli clear
//! ```
//!
//! # Commands
//!
//! - `show` - Print lines and totals
//! - `add` - Insert or overwrite a line
//! - `set-qty` - Change the quantity of a line
//! - `remove` - Remove a line
//! - `clear` - Empty the cart
//! - `check` - Report whether a line would conflict with the cart

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;

use bazaar_cart::CartConfig;
use clap::{Parser, Subcommand};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::cart::{AddArgs, LineArgs};

#[derive(Parser)]
#[command(name = "bz-cli")]
#[command(author, version, about = "Bazaar cart tools")]
struct Cli {
    /// Directory of the file-backed store (overrides `CART_DATA_DIR`)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Storage key of the cart (overrides `CART_STORAGE_KEY`)
    #[arg(long, global = true)]
    key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the cart
    Show {
        /// Print the cart view as JSON
        #[arg(long)]
        json: bool,
    },
    /// Insert or overwrite a line
    Add(AddArgs),
    /// Change the quantity of a line (0 removes it)
    SetQty {
        #[command(flatten)]
        line: LineArgs,

        /// New quantity
        #[arg(allow_negative_numbers = true)]
        quantity: i64,
    },
    /// Remove a line
    Remove {
        #[command(flatten)]
        line: LineArgs,
    },
    /// Empty the cart
    Clear,
    /// Report whether a line would conflict with the cart
    Check {
        #[command(flatten)]
        line: LineArgs,
    },
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &CartConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::debug!("Sentry initialized");
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
    // Quiet by default; the command output goes to stdout
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "bazaar_cart=warn,bazaar_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match CartConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            init_tracing();
            tracing::error!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);
    init_tracing();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli, config).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, mut config: CartConfig) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if let Some(key) = cli.key {
        config.storage_key = key;
    }

    let origin = config.file_origin()?;
    let cart = bazaar_cart::CartContext::from_config(&origin, &config);

    let result = match cli.command {
        Commands::Show { json } => commands::cart::show(cart.store(), json),
        Commands::Add(args) => commands::cart::add(cart.store(), args),
        Commands::SetQty { line, quantity } => {
            commands::cart::set_quantity(cart.store(), &line, quantity)
        }
        Commands::Remove { line } => commands::cart::remove(cart.store(), &line),
        Commands::Clear => {
            commands::cart::clear(cart.store());
            Ok(())
        }
        Commands::Check { line } => commands::cart::check(cart.store(), &line),
    };

    // Flush before exiting so the debounced write is not lost
    cart.close().await;
    result?;
    Ok(())
}
