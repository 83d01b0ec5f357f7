//! doe-scanner - distributed encrypted-DNS measurement
//!
//! Runs as a consumer, a producer, or both at once (standalone).

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    doe_cli::run().await
}
