//! `daybridge` – headless pub/sub node demo
//!
//! 1. Loads `~/.daybridge/config.toml` (defaults when absent).
//! 2. Starts a node over the in-process loopback transport and subscribes to
//!    the configured topics.
//! 3. Prints every delivered message as JSON and publishes a heartbeat once
//!    per second.
//! 4. Stops the node gracefully on **Ctrl-C**.
//!
//! `daybridge --write-config` saves the effective configuration and exits.

mod config;
mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use colored::Colorize;
use daybridge_middleware::{LoopbackTransport, Node};
use daybridge_types::{BridgeError, HostObject, HostValue};
use tokio::sync::Notify;
use tracing::{error, warn};

use crate::config::Config;

fn main() {
    let _telemetry = telemetry::init_tracing("daybridge");

    print_banner();

    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    if std::env::args().any(|arg| arg == "--write-config") {
        match config::save(&cfg) {
            Ok(()) => println!(
                "  Config written to {}",
                config::config_path().display().to_string().bold()
            ),
            Err(e) => {
                println!("{}: {}", "Config error".red(), e);
                std::process::exit(1);
            }
        }
        return;
    }

    let shutdown = Arc::new(Notify::new());
    let shutdown_signal = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping node …".yellow().bold());
        shutdown_signal.notify_one();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; stop with SIGKILL");
    }

    // The node is bound to the thread that drives it.
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "could not build runtime");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cfg, shutdown)) {
        println!("{}: {}", "Node error".red().bold(), e);
        std::process::exit(1);
    }
    println!("{}", "  ✓ Node stopped.".green());
}

enum Wake {
    Shutdown,
    Heartbeat,
    Messages,
}

async fn run(cfg: Config, shutdown: Arc<Notify>) -> Result<(), BridgeError> {
    let mut node = Node::new(Arc::new(LoopbackTransport::new()), cfg.node_config());
    node.start()?;
    println!(
        "  Node {} bound to {}",
        cfg.node_name.bold(),
        format!("{}:{}", cfg.address, cfg.port).cyan()
    );

    for topic in &cfg.subscribe {
        node.subscribe(topic)?;
        println!("  Subscribed to {}", topic.bold());
    }
    node.set_callback(Some(Box::new(|value: HostValue| println!("{}", render_message(&value)))));
    println!();

    let mut heartbeat = tokio::time::interval(Duration::from_secs(1));
    let mut seq: u64 = 0;
    loop {
        let wake = tokio::select! {
            _ = shutdown.notified() => Wake::Shutdown,
            _ = heartbeat.tick() => Wake::Heartbeat,
            _ = node.wait_for_messages() => Wake::Messages,
        };
        match wake {
            Wake::Shutdown => break,
            Wake::Heartbeat if !cfg.echo_topic.is_empty() => {
                seq += 1;
                if let Err(e) = node.publish(&cfg.echo_topic, &heartbeat_value(&cfg.node_name, seq)) {
                    warn!(topic = %cfg.echo_topic, error = %e, "heartbeat not published");
                }
            }
            Wake::Heartbeat => {}
            Wake::Messages => {
                let report = node.dispatch_pending();
                for (topic, e) in &report.failed {
                    println!("  {} {}: {}", "✗".red(), topic, e);
                }
            }
        }
    }

    node.stop()?;
    let stats = node.relay_stats();
    println!(
        "  {} messages relayed, {} dropped",
        stats.enqueued.to_string().bold(),
        stats.dropped
    );
    Ok(())
}

fn heartbeat_value(node_name: &str, seq: u64) -> HostValue {
    HostValue::Object(
        HostObject::new()
            .with("node", node_name)
            .with("seq", seq as f64)
            .with("sent_at", Utc::now().to_rfc3339()),
    )
}

fn render_message(value: &HostValue) -> String {
    let json = serde_json::to_string(value).unwrap_or_else(|e| format!("<unprintable: {e}>"));
    format!(
        "  {} {}",
        Local::now().format("%H:%M:%S").to_string().dimmed(),
        json.green()
    )
}

fn print_banner() {
    println!();
    println!("{}", "  ╔══════════════════════════════════╗".cyan());
    println!("{}", "  ║      daybridge pub/sub node      ║".cyan().bold());
    println!("{}", "  ╚══════════════════════════════════╝".cyan());
    println!(
        "  Config: {}",
        config::config_path().display().to_string().dimmed()
    );
    println!();
}
