// One-shot schema bootstrap: creates the subscriptions table and its
// supporting index if they do not already exist. Safe to re-run.

use anyhow::Result;
use clap::Parser;
use lib_subwatch::PgSubscriptionLedger;

#[derive(Parser, Debug)]
#[command(about = "Create the subscriptions schema if missing")]
struct Args {
    /// Postgres connection string.
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let ledger = PgSubscriptionLedger::connect(&args.database_url, 1).await?;
    ledger.ensure_schema().await?;
    ledger.ping().await?;
    println!("schema is ready");

    ledger.pool().close().await;
    Ok(())
}
