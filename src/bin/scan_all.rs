//! Runs one scan-all job from the command line and follows it to the end.
//!
//! Ctrl-C sends a cancel request to the worker; a second Ctrl-C exits
//! without waiting for the acknowledgement.

use std::sync::Arc;

use clap::Parser;
use scan_orchestrator::{
    config::AppConfig,
    models::{
        job::{ItemResult, ScanAllRequest},
        snapshot::{ControllerPhase, DisplaySnapshot},
    },
    services::{
        controller::{JobObserver, ScanController},
        worker_client::WorkerClient,
    },
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "scan-all", about = "Scan every action of a project for matching documents")]
struct Args {
    /// Project whose actions should be scanned
    #[arg(long)]
    project: String,

    /// Confirm the scan without prompting
    #[arg(long, short = 'y')]
    yes: bool,

    /// Override the status poll interval in milliseconds
    #[arg(long)]
    poll_interval_ms: Option<u64>,
}

/// Prints progress lines for a human watching the terminal.
struct ConsoleObserver;

impl JobObserver for ConsoleObserver {
    fn on_start(&self) {
        println!("Submitting scan-all job...");
    }

    fn on_status_change(&self, snapshot: &DisplaySnapshot) {
        match &snapshot.current_item {
            Some(item) => println!(
                "  {:>3}%  {}/{}  {}",
                snapshot.percent, snapshot.completed, snapshot.total, item
            ),
            None => println!(
                "  {:>3}%  {}/{}",
                snapshot.percent, snapshot.completed, snapshot.total
            ),
        }
    }

    fn on_complete(&self, results: &[ItemResult]) {
        let successful = results.iter().filter(|r| r.success).count();
        println!(
            "Scan complete: {} of {} actions matched documents",
            successful,
            results.len()
        );
        for result in results {
            let label = result
                .label
                .as_deref()
                .or(result.item_id.as_deref())
                .unwrap_or("(unnamed)");
            if result.success {
                println!("  ✓ {} ({} documents)", label, result.found_documents.len());
            } else {
                println!("  ✗ {} {}", label, result.error.as_deref().unwrap_or(""));
            }
        }
    }

    fn on_error(&self, message: &str) {
        eprintln!("Scan did not finish: {}", message);
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let config = AppConfig::from_env().expect("Failed to load configuration");

    let worker = WorkerClient::new(
        &config.worker_base_url,
        config.worker_api_token.clone(),
        config.request_timeout(),
    )
    .expect("Failed to initialize worker client");

    let mut settings = config.controller_settings();
    if let Some(ms) = args.poll_interval_ms {
        settings.poll_interval = std::time::Duration::from_millis(ms);
    }

    let controller = ScanController::new(Arc::new(worker), Arc::new(ConsoleObserver), settings);
    let request = ScanAllRequest {
        project_id: Some(args.project.clone()),
        confirmed: args.yes,
    };

    if let Err(e) = controller.start(&request) {
        eprintln!("{}", e);
        std::process::exit(2);
    }

    let mut updates = controller.subscribe();
    let mut cancel_sent = false;

    let phase = loop {
        let phase = updates.borrow_and_update().phase;
        if phase.is_terminal() {
            break phase;
        }

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break controller.current_snapshot().phase;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if cancel_sent {
                    eprintln!("Exiting without waiting for the worker");
                    std::process::exit(130);
                }
                eprintln!("Cancelling scan (Ctrl-C again to exit immediately)...");
                cancel_sent = controller.cancel().await;
            }
        }
    };

    if phase != ControllerPhase::Completed {
        std::process::exit(1);
    }
}
