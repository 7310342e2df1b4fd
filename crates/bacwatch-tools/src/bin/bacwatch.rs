use bacwatch_client::{RunSummary, ShutdownToken, Supervisor};
use bacwatch_tools::{demo_site, drive_demo, resolve_config, ConfigOverrides};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "bacwatch")]
struct Args {
    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(flatten)]
    overrides: ConfigOverrides,
    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long)]
    run_seconds: Option<u64>,
    /// Seconds between simulated value changes.
    #[arg(long, default_value_t = 2)]
    change_interval_secs: u64,
    /// Print updates and the final snapshot as JSON.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    let config = resolve_config(args.config.as_deref(), &args.overrides)?;

    let engine = Arc::new(demo_site(&config));
    let token = ShutdownToken::new();
    let json = args.json;
    let supervisor = Supervisor::new(engine.clone(), config.clone(), token.clone()).with_hook(
        move |update| {
            if json {
                match serde_json::to_string(&update) {
                    Ok(line) => println!("{line}"),
                    Err(err) => log::warn!("cannot encode update: {err}"),
                }
            } else {
                let value = update
                    .present_value
                    .map_or_else(|| "-".to_string(), |v| v.to_string());
                println!(
                    "{} {} = {} ({}s left)",
                    update.device_id, update.object_id, value, update.time_remaining_seconds
                );
            }
        },
    )?;

    tokio::spawn({
        let token = token.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    log::info!("Ctrl-C received");
                    token.trigger();
                }
                Err(err) => log::warn!("cannot listen for Ctrl-C: {err}"),
            }
        }
    });
    if let Some(secs) = args.run_seconds {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            token.trigger();
        });
    }
    tokio::spawn(drive_demo(
        engine,
        config,
        Duration::from_secs(args.change_interval_secs.max(1)),
        token,
    ));

    let summary = supervisor.run().await?;
    if args.json {
        let snapshot = serde_json::json!({
            "summary": summary,
            "objects": supervisor.repository().snapshot(),
        });
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    if let Some(device) = summary.device {
        println!("device: {device}");
    }
    if let Some(report) = summary.enumeration {
        println!("enumeration: {report}");
    }
    println!("objects: {}", summary.objects);
    for sub in &summary.subscriptions {
        println!(
            "subscription {}: {:?}, {} notifications",
            sub.key, sub.state, sub.notifications
        );
    }
    println!(
        "notifications: {} applied, {} unmatched, {} unknown, {} hook drops",
        summary.dispatch.applied,
        summary.dispatch.unmatched,
        summary.dispatch.unknown_point,
        summary.dispatch.hook_dropped
    );
    println!("uptime: {:.1}s", summary.uptime.as_secs_f64());
}
