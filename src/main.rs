//! Support Ledger - maintenance CLI
//!
//! Runs learning passes and inspects the ledger and knowledge stores.

use support_ledger::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // WARN by default, use RUST_LOG=info for more
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into())
        )
        .init();

    cli::run().await
}
