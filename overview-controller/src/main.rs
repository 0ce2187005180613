use anyhow::Result;
use fleet_overview_controller::Args;

#[tokio::main]
async fn main() -> Result<()> {
    Args::parse_and_run().await
}
