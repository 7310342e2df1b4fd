use bacwatch_client::{DeviceDiscoverer, ProtocolEngine};
use bacwatch_tools::{demo_site, resolve_config, ConfigOverrides};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "bacwatch-scan")]
struct Args {
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(flatten)]
    overrides: ConfigOverrides,
    #[arg(long, default_value_t = 3)]
    timeout_secs: u64,
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    let config = resolve_config(args.config.as_deref(), &args.overrides)?;

    let engine = Arc::new(demo_site(&config));
    engine.start(&config.local).await?;
    let devices = DeviceDiscoverer::new(engine.clone())
        .scan(Duration::from_secs(args.timeout_secs))
        .await;
    engine.stop().await?;
    let devices = devices?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
    } else {
        for (i, d) in devices.iter().enumerate() {
            println!("{i}: device {} at {}", d.instance, d.address);
        }
    }
    Ok(())
}
