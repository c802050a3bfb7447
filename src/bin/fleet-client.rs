//! Development client for the virtual heat-pump fleet.
//!
//! Connects to the simulator over WebSocket and exercises the subscription
//! protocol from the command line.
//!
//! Usage:
//!   cargo run --bin fleet-client -- watch
//!   cargo run --bin fleet-client -- seed fleet.json
//!   cargo run --bin fleet-client -- unsubscribe

use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Default fleet simulator WebSocket URL
const DEFAULT_FLEET_URL: &str = "ws://localhost:8080";

#[derive(Parser)]
#[command(name = "fleet-client")]
#[command(about = "Development client for the virtual heat-pump fleet")]
struct Cli {
    /// Fleet WebSocket URL
    #[arg(long, env = "FLEET_URL", default_value = DEFAULT_FLEET_URL)]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe and stream sensor updates until interrupted
    Watch,
    /// Subscribe with a replacement sensor list loaded from a JSON file
    Seed {
        /// Path to a JSON array of sensor records
        path: PathBuf,
    },
    /// Send a lone unsubscribe (the server should answer with an ack)
    Unsubscribe,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    println!("Connecting to {}...", cli.url);
    let (ws_stream, _) = connect_async(&cli.url).await.map_err(|e| {
        eprintln!("Failed to connect to {}", cli.url);
        eprintln!("Make sure the fleet simulator is running and accessible.");
        e
    })?;
    println!("Connected!");

    let (mut write, mut read) = ws_stream.split();

    let control = match &cli.command {
        Commands::Watch => json!({"type": "subscribe", "target": "heatpump", "list": null}),
        Commands::Seed { path } => {
            let list: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
            json!({"type": "subscribe", "target": "heatpump", "list": list})
        }
        Commands::Unsubscribe => json!({"type": "unsubscribe", "target": "heatpump", "list": null}),
    };
    write.send(Message::text(control.to_string())).await?;

    match cli.command {
        Commands::Watch | Commands::Seed { .. } => {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let text_str: &str = &text;
                        match serde_json::from_str::<serde_json::Value>(text_str) {
                            Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                            Err(_) => println!("Received: {text}"),
                        }
                    }
                    Ok(Message::Close(_)) => {
                        println!("Server closed connection");
                        break;
                    }
                    Err(e) => {
                        eprintln!("WebSocket error: {e}");
                        break;
                    }
                    _ => {}
                }
            }
        }
        Commands::Unsubscribe => {
            // An unsubscribe on an idle connection is a no-op with no reply,
            // so don't wait forever.
            let reply = tokio::time::timeout(Duration::from_secs(5), async {
                while let Some(msg) = read.next().await {
                    if let Ok(Message::Text(text)) = msg {
                        return Some(text);
                    }
                }
                None
            })
            .await;

            match reply {
                Ok(Some(text)) => println!("Received: {text}"),
                Ok(None) => println!("Connection closed without a reply"),
                Err(_) => println!("No reply (connection was not subscribed)"),
            }
        }
    }

    Ok(())
}
