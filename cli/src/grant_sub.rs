// Manually grant (or revoke) a subscription, bypassing the payment monitor.
// Useful for support interventions and for seeding accounts during testing.
//
// Usage:
//   DATABASE_URL=postgres://... grant_sub alice --days 31
//   DATABASE_URL=postgres://... grant_sub alice --days 0    # revoke

use anyhow::Result;
use clap::Parser;
use lib_subwatch::{GrantOutcome, PgSubscriptionLedger, SubscriptionLedger};

#[derive(Parser, Debug)]
#[command(about = "Grant or revoke a subscription directly in the database")]
struct Args {
    /// Account to grant the subscription to (1-16 characters).
    username: String,

    /// Length of the subscription window in days. 0 revokes.
    #[arg(long, default_value_t = 31)]
    days: u32,

    /// Postgres connection string.
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let ledger = PgSubscriptionLedger::connect(&args.database_url, 1).await?;

    let outcome = if args.days == 0 {
        ledger.revoke(&args.username).await?
    } else {
        ledger.grant(&args.username, args.days).await?
    };

    match outcome {
        GrantOutcome::Granted { expires } => {
            println!("{}: subscription active until {}", args.username, expires);
        }
        GrantOutcome::AlreadyActive => {
            println!("{}: already covered by a longer subscription", args.username);
        }
        GrantOutcome::Revoked => {
            println!("{}: subscription revoked", args.username);
        }
        GrantOutcome::NotFound => {
            println!("{}: no subscription on record", args.username);
        }
    }

    ledger.pool().close().await;
    Ok(())
}
