// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use roost::config::NodeConfig;

#[derive(Parser)]
#[command(name = "roost", version, about = "Real-time sensor telemetry node.")]
struct Cli {
    #[command(flatten)]
    config: NodeConfig,

    #[command(subcommand)]
    subcommand: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the node (the default when no subcommand is given).
    Serve,
    /// Operate on a running node over its HTTP API.
    Node {
        #[command(subcommand)]
        action: NodeAction,
    },
}

#[derive(clap::Subcommand)]
enum NodeAction {
    /// Print the node's JSON status snapshot.
    Status,
    /// Refuse new joins and wait for active sessions to end.
    Drain,
    /// Stop the node.
    Shutdown,
}

#[tokio::main]
async fn main() {
    // Usage errors exit 64 rather than clap's default.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { 64 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.subcommand {
        None | Some(Commands::Serve) => {
            if let Err(e) = cli.config.validate() {
                eprintln!("error: {e}");
                std::process::exit(64);
            }
            if let Err(e) = roost::run(cli.config).await {
                error!("fatal: {e:#}");
                std::process::exit(1);
            }
        }
        Some(Commands::Node { action }) => {
            std::process::exit(node_command(&cli.config, action).await);
        }
    }
}

/// Drive a running node over HTTP. Returns the process exit code.
async fn node_command(config: &NodeConfig, action: NodeAction) -> i32 {
    roost::catalog::ensure_crypto();
    let base = format!("http://{}:{}/api/v1", config.host, config.port);
    let client = reqwest::Client::new();
    let authorize = |req: reqwest::RequestBuilder| match &config.auth_token {
        Some(token) => req.bearer_auth(token),
        None => req,
    };

    match action {
        NodeAction::Status => {
            let response = authorize(client.get(format!("{base}/status"))).send().await;
            match response {
                Ok(response) => match response.json::<serde_json::Value>().await {
                    Ok(body) => {
                        println!(
                            "{}",
                            serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string())
                        );
                        0
                    }
                    Err(e) => {
                        eprintln!("error: bad status payload: {e}");
                        1
                    }
                },
                Err(e) => {
                    eprintln!("error: node unreachable: {e}");
                    1
                }
            }
        }
        NodeAction::Drain => {
            let response = authorize(client.post(format!("{base}/drain")))
                .timeout(config.drain_deadline() + std::time::Duration::from_secs(10))
                .send()
                .await;
            match response {
                Ok(response) => match response.json::<serde_json::Value>().await {
                    Ok(body) if body["drained"] == serde_json::json!(true) => 0,
                    Ok(body) => {
                        eprintln!(
                            "drain deadline exceeded, {} sessions still active",
                            body["active_connections"]
                        );
                        2
                    }
                    Err(e) => {
                        eprintln!("error: bad drain payload: {e}");
                        1
                    }
                },
                Err(e) => {
                    eprintln!("error: node unreachable: {e}");
                    1
                }
            }
        }
        NodeAction::Shutdown => {
            match authorize(client.post(format!("{base}/shutdown"))).send().await {
                Ok(_) => 0,
                Err(e) => {
                    eprintln!("error: node unreachable: {e}");
                    1
                }
            }
        }
    }
}
