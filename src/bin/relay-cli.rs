use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "relay-cli")]
#[command(about = "Traffic driver for a trace-relay sender", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8000")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check service health
    Health,
    /// Show the metrics endpoint
    Metrics,
    /// Send messages through the relay
    Send {
        /// Number of requests to send
        #[arg(short, long, default_value_t = 1)]
        count: u32,

        /// Message placed in the request body
        #[arg(short, long, default_value = "Hello from relay-cli")]
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::Health => {
            let res = client.get(format!("{}/health", base)).send().await?;
            print_response(res).await?;
        }
        Commands::Metrics => {
            let res = client.get(format!("{}/metrics", base)).send().await?;
            print_response(res).await?;
        }
        Commands::Send { count, message } => {
            let mut failures = 0u32;
            for i in 1..=count {
                let body = json!({
                    "message": message,
                    "request_id": uuid::Uuid::new_v4().to_string(),
                    "sequence": i,
                });
                let started = Instant::now();
                let res = client.post(format!("{}/send", base)).json(&body).send().await?;
                if !res.status().is_success() {
                    failures += 1;
                }
                println!("[{}/{}] {} in {:?}", i, count, res.status(), started.elapsed());
                print_response(res).await?;
            }
            if count > 1 {
                println!("{} of {} requests failed", failures, count);
            }
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) if status.is_success() => println!("{}", text),
        Err(_) => eprintln!("Error: service returned status {}: {}", status, text),
    }
    Ok(())
}
