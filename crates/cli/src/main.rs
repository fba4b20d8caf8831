//! GAPA CLI - Probe the checkout backend and its third parties.
//!
//! # Usage
//!
//! ```bash
//! # Show a member's cart, or the guest cart persisted in GAPA_STORAGE_DIR
//! gapa cart --user 42
//! gapa cart
//!
//! # List regions, only those served by GAPA flat-rate delivery
//! gapa regions --flat-rate
//!
//! # Flat-rate price table for a region
//! gapa rates 25
//!
//! # Live GIG quote
//! gapa quote --state Oyo --city Ibadan --price 45000 --quantity 2
//!
//! # Address autocomplete through the provider cascade
//! gapa geocode "12 Allen Avenue" --details
//!
//! # Currency conversion
//! gapa fx 87500 --to USD
//!
//! # Checkout totals
//! gapa totals --price 40000 --quantity 2 --delivery 6000
//! ```
//!
//! Configuration is read from the same environment variables as the
//! checkout engine (see `gapa_checkout::config`).

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use gapa_checkout::CheckoutConfig;
use gapa_core::CurrencyCode;
use rust_decimal::Decimal;
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "gapa")]
#[command(author, version, about = "GAPA checkout tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a cart with its totals
    Cart {
        /// Member user id (omit for the persisted guest cart)
        #[arg(short, long)]
        user: Option<String>,
    },
    /// List delivery regions
    Regions {
        /// Only regions served by GAPA flat-rate delivery
        #[arg(long)]
        flat_rate: bool,
    },
    /// Show a region's flat-rate price table
    Rates {
        /// Region id
        region_id: String,
    },
    /// Request a live GIG Logistics quote
    Quote {
        /// Destination state
        #[arg(short, long)]
        state: String,

        /// Destination city (defaults to the state)
        #[arg(short, long, default_value = "")]
        city: String,

        /// Street address
        #[arg(short, long, default_value = "")]
        address: String,

        /// Unit price of the item
        #[arg(short, long)]
        price: Decimal,

        /// Number of units
        #[arg(short, long, default_value_t = 1)]
        quantity: i64,

        /// Unit weight in kilograms
        #[arg(short, long)]
        weight: Option<Decimal>,
    },
    /// Search addresses through the geocoding cascade
    Geocode {
        /// Partial address
        query: String,

        /// Resolve the first suggestion into structured fields
        #[arg(long)]
        details: bool,
    },
    /// Convert an amount between currencies
    Fx {
        /// Amount to convert
        amount: Decimal,

        /// Source currency
        #[arg(long, default_value = "NGN")]
        from: CurrencyCode,

        /// Target currency
        #[arg(long)]
        to: CurrencyCode,
    },
    /// Compute checkout totals for a single line
    Totals {
        /// Unit price
        #[arg(short, long)]
        price: Decimal,

        /// Number of units
        #[arg(short, long, default_value_t = 1)]
        quantity: i64,

        /// Delivery price
        #[arg(short, long, default_value_t = Decimal::ZERO)]
        delivery: Decimal,
    },
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &CheckoutConfig) -> Option<sentry::ClientInitGuard> {
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

    if guard.is_enabled() {
        tracing::info!("Sentry error tracking initialized");
    }

    Some(guard)
}

/// Map tracing levels to Sentry events or breadcrumbs.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR => sentry_tracing::EventFilter::Event,
        tracing::Level::WARN | tracing::Level::INFO => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = CheckoutConfig::from_env();
    let _sentry_guard = config.as_ref().ok().and_then(init_sentry);

    // Defaults to info level for the checkout engine if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "gapa_checkout=info,gapa_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    let result: Result<(), Box<dyn std::error::Error>> = match config {
        Ok(config) => run(cli, &config).await,
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: &CheckoutConfig) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Cart { user } => commands::cart::show(config, user).await?,
        Commands::Regions { flat_rate } => commands::delivery::regions(config, flat_rate).await?,
        Commands::Rates { region_id } => commands::delivery::rates(config, &region_id).await?,
        Commands::Quote {
            state,
            city,
            address,
            price,
            quantity,
            weight,
        } => {
            let destination = commands::delivery::Destination {
                state,
                city,
                address,
            };
            let line = commands::cart::single_line(price, quantity, weight);
            commands::delivery::quote(config, &destination, line).await?;
        }
        Commands::Geocode { query, details } => {
            commands::lookup::geocode(config, &query, details).await?;
        }
        Commands::Fx { amount, from, to } => commands::lookup::fx(config, amount, &from, &to).await?,
        Commands::Totals {
            price,
            quantity,
            delivery,
        } => commands::cart::totals(price, quantity, delivery)?,
    }
    Ok(())
}
