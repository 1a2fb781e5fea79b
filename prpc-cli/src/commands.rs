//! Command execution.

use crate::Commands;
use colored::Colorize;
use prpc_client::naming::{self, NamingService};
use prpc_client::{Channel, ChannelOptions, ClientError, Connection, LoadBalancerKind};
use std::time::Instant;

/// Executes a command and returns the formatted output.
pub async fn execute(
    backends: &str,
    lb: LoadBalancerKind,
    options: ChannelOptions,
    cmd: Commands,
) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Call {
            method,
            message,
            count,
            key,
        } => {
            let request = parse_message_arg(&message)?;
            let channel = Channel::init(backends, lb, options).await?;

            let mut lines = Vec::new();
            let mut failures = 0;
            for i in 0..count {
                let started = Instant::now();
                let result: Result<String, ClientError> = match &key {
                    Some(key) => {
                        channel
                            .call_method_with_key(key.as_bytes(), &method, &request)
                            .await
                    }
                    None => channel.call_method(&method, &request).await,
                };
                let elapsed = format_elapsed(started);

                match result {
                    Ok(reply) => lines.push(format!("[{}] {} ({})", i + 1, reply, elapsed.dimmed())),
                    Err(e) => {
                        failures += 1;
                        lines.push(format!("[{}] {} {}", i + 1, "failed:".red(), e));
                    }
                }
            }
            channel.close().await;

            if count > 1 {
                lines.push(format!(
                    "{} {} calls, {} failed",
                    "Done".green(),
                    count,
                    failures
                ));
            }
            Ok(lines.join("\n"))
        }

        Commands::Check { method } => {
            let addrs = naming::from_url(backends)?.servers()?;
            let mut lines = Vec::new();
            for addr in addrs {
                let started = Instant::now();
                let outcome = check_backend(&addr, &method, &options).await;
                let elapsed = format_elapsed(started);
                match outcome {
                    Ok(()) => lines.push(format!("{} {} ({})", "UP".green(), addr.cyan(), elapsed)),
                    Err(e) => lines.push(format!("{} {} ({})", "DOWN".red(), addr.cyan(), e)),
                }
            }
            Ok(lines.join("\n"))
        }

        Commands::Resolve => {
            let addrs = naming::from_url(backends)?.servers()?;
            Ok(addrs.join("\n"))
        }
    }
}

/// Dials `addr` and makes one echo call on it.
async fn check_backend(
    addr: &str,
    method: &str,
    options: &ChannelOptions,
) -> Result<(), ClientError> {
    let conn = Connection::connect(options.connection_config(addr)).await?;
    let reply: String = conn.call(method, &"ping".to_string()).await?;
    conn.close().await?;
    if reply != "ping" {
        tracing::warn!("{} answered '{}' to an echo of 'ping'", addr, reply);
    }
    Ok(())
}

/// Parses a message argument (either inline text or @file).
fn parse_message_arg(arg: &str) -> Result<String, Box<dyn std::error::Error>> {
    if let Some(path) = arg.strip_prefix('@') {
        Ok(std::fs::read_to_string(path)?)
    } else {
        Ok(arg.to_string())
    }
}

/// Formats the time since `started` for display.
fn format_elapsed(started: Instant) -> String {
    let micros = started.elapsed().as_micros();
    if micros >= 1000 {
        format!("{:.2} ms", micros as f64 / 1000.0)
    } else {
        format!("{} µs", micros)
    }
}
