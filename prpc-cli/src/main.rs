//! prpc-cli - Command-line interface for prpc
//!
//! Calls string methods on a set of baidu_std backends through a
//! load-balanced channel.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use prpc_client::{ChannelOptions, LoadBalancerKind};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "prpc-cli")]
#[command(about = "Command-line interface for baidu_std RPC backends")]
#[command(version)]
struct Cli {
    /// Backend naming URL (list://host:port,... or file:///path)
    #[arg(short, long, env = "PRPC_BACKENDS", default_value = "list://127.0.0.1:8170")]
    backends: String,

    /// Load balancer: rr, random or c_hash
    #[arg(short, long, env = "PRPC_LB", default_value = "rr")]
    lb: LoadBalancerKind,

    /// Connect timeout in milliseconds
    #[arg(long, default_value = "3000")]
    connect_timeout_ms: u64,

    /// Request timeout in milliseconds (0 waits forever)
    #[arg(long, default_value = "10000")]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn channel_options(&self) -> ChannelOptions {
        let request_timeout = (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms));
        ChannelOptions::new()
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .with_request_timeout(request_timeout)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Call a method with a string request
    Call {
        /// Method as service.method
        #[arg(short, long, default_value = "EchoService.Echo")]
        method: String,

        /// Request message (or @file to read it from a file)
        #[arg(short = 'M', long)]
        message: String,

        /// Number of calls to make
        #[arg(short, long, default_value = "1")]
        count: u32,

        /// Content hash key (c_hash only; defaults to the request itself)
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Echo a message through every backend, one at a time
    Check {
        /// Method as service.method
        #[arg(short, long, default_value = "EchoService.Echo")]
        method: String,
    },

    /// Print the resolved backend list without connecting
    Resolve,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let options = cli.channel_options();

    match commands::execute(&cli.backends, cli.lb, options, cli.command).await {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }
}
