use anyhow::Context as _;
use cloud_reconciler::{config, run, Context, Request};
use std::io::Read;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let path = std::env::args()
        .nth(1)
        .context("Usage: cloud-reconciler <config.yaml> < request.json")?;
    let config = config::load(path)?;

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("Failed to read request")?;
    let request: Request = serde_json::from_str(&input).context("Failed to parse request")?;

    let (ctx, canceller) = Context::with_timeout(DEFAULT_TIMEOUT);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling");
            canceller.cancel();
        }
    });

    let response = run(config, request, &ctx).await?;
    log::info!("Result: {:?}", response.outcome);
    println!("{}", serde_json::to_string_pretty(&response)?);

    if response.error.is_some() {
        std::process::exit(1);
    }
    Ok(())
}
