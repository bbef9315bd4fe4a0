//! Print camera and interface hot-plug events until Enter is pressed

use anyhow::Result;
use camtopo_tools::events::{gev_notice, start_watch};
use camtopo_tools::{load_config, logging, Console};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "enumeration-events")]
#[command(about = "Print camera and interface arrival and removal events")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(long, env = camtopo_tools::config::CONFIG_ENV, default_value = camtopo_tools::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Exit after this many seconds instead of waiting for Enter
    #[arg(short, long)]
    wait_secs: Option<u64>,
}

/// Resolves once a line (or end of input) arrives on stdin
fn enter_pressed() -> oneshot::Receiver<()> {
    let (tx, rx) = oneshot::channel();
    // A plain thread, so a pending read never holds up runtime shutdown.
    std::thread::spawn(move || {
        let mut line = String::new();
        if let Err(e) = std::io::stdin().read_line(&mut line) {
            debug!(error = %e, "stdin read failed");
        }
        let _ = tx.send(());
    });
    rx
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args.config)?;
    logging::init(args.log_level.as_deref().unwrap_or(&config.logging.level))?;
    info!("camtopo enumeration-events v{}", env!("CARGO_PKG_VERSION"));

    let console = Console::stdout();
    let registry = config.open_registry()?;

    console.print(gev_notice(registry.gev_enumeration()?));
    let snapshot = registry.snapshot()?;
    console.print(&format!("Number of cameras detected: {}\n", snapshot.devices().len()));
    console.print(&format!("Number of interfaces detected: {}\n", snapshot.interfaces().len()));
    console.print("\n*** CONFIGURING ENUMERATION EVENTS ***\n");

    let observed = Arc::new(AtomicUsize::new(0));
    let mut events = registry.subscribe_events();
    let counter = observed.clone();
    let stream = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    debug!(event = %event, "Topology event");
                    counter.fetch_add(1, Ordering::Relaxed);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event stream lagged");
                    counter.fetch_add(skipped as usize, Ordering::Relaxed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let watch = start_watch(&registry, &console)?;
    console.print("\nReady! Remove/Plug in cameras to test or press Enter to exit...\n");

    let wait = args.wait_secs.or(config.events.wait_secs);
    let deadline = async {
        match wait {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = enter_pressed() => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        _ = deadline => debug!("Wait elapsed"),
    }

    watch.stop()?;
    console.print("Event handlers unregistered...");
    stream.abort();
    console.print(&format!(
        "{} topology events observed",
        observed.load(Ordering::Relaxed)
    ));

    registry.release()?;
    console.print("\nDone!");
    Ok(())
}
