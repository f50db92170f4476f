//! Tienda CLI - Database migrations and cart maintenance.
//!
//! # Usage
//!
//! ```bash
//! # Run storefront database migrations
//! tienda migrate
//!
//! # Give users without a remote cart an empty one
//! tienda carts backfill user-1 user-2
//!
//! # Print a user's remote cart document
//! tienda carts show user-1
//!
//! # Move a native client's cart file into a user's remote cart
//! tienda carts import --slot ~/.tienda/cart.json --user user-1
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `carts backfill` - Create missing remote cart documents
//! - `carts show` - Print a remote cart document as JSON
//! - `carts import` - Load a local cart file as a signed-in user

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "tienda")]
#[command(author, version, about = "Tienda CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run storefront database migrations
    Migrate,
    /// Inspect and maintain stored carts
    Carts {
        #[command(subcommand)]
        action: CartsAction,
    },
}

#[derive(Subcommand)]
enum CartsAction {
    /// Create an empty remote cart for each user that has none
    Backfill {
        /// User IDs to backfill
        #[arg(required = true)]
        users: Vec<String>,
    },
    /// Print a user's remote cart document as JSON
    Show {
        /// User ID
        user: String,
    },
    /// Load a local cart file as a signed-in user, migrating it if the
    /// user has no remote cart yet
    Import {
        /// Path to the local cart file
        #[arg(short, long)]
        slot: PathBuf,

        /// User ID to sign in as
        #[arg(short, long)]
        user: String,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::storefront().await?,
        Commands::Carts { action } => match action {
            CartsAction::Backfill { users } => {
                commands::carts::backfill(&users).await?;
            }
            CartsAction::Show { user } => commands::carts::show(&user).await?,
            CartsAction::Import { slot, user } => {
                commands::carts::import(slot, &user).await?;
            }
        },
    }
    Ok(())
}
