use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the market data gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Admin API key; only needed for admin commands.
    #[arg(short, long, default_value = "")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Full health report (breakers, queues, cache)
    Health,
    /// Circuit breaker state per service
    Breakers,
    /// Strict admission queue metrics
    Queues,
    /// Force a service's circuit closed
    Reset { service: String },
    /// Force a service's circuit open
    Trip { service: String },
    /// Remove cache keys matching a glob pattern
    Invalidate { pattern: String },
    /// Cache backend statistics
    Cache,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    if !cli.key.is_empty() {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
        );
    }

    match cli.command {
        Commands::Health => {
            let report = fetch_health(&client, &cli.url).await?;
            print_json(&report)?;
        }
        Commands::Breakers => {
            let report = fetch_health(&client, &cli.url).await?;
            print_json(&report["breakers"])?;
        }
        Commands::Queues => {
            let report = fetch_health(&client, &cli.url).await?;
            print_json(&report["queues"])?;
        }
        Commands::Reset { service } => {
            let res = client
                .post(format!("{}/admin/breakers/{}/reset", cli.url, service))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Trip { service } => {
            let res = client
                .post(format!("{}/admin/breakers/{}/trip", cli.url, service))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Invalidate { pattern } => {
            let res = client
                .post(format!("{}/admin/cache/invalidate", cli.url))
                .headers(headers)
                .json(&json!({ "pattern": pattern }))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Cache => {
            let res = client
                .get(format!("{}/admin/cache", cli.url))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
    }

    Ok(())
}

/// The detailed report is served with 503 when degraded; both carry a body.
async fn fetch_health(client: &reqwest::Client, url: &str) -> Result<Value, Box<dyn std::error::Error>> {
    let res = client.get(format!("{}/health/detailed", url)).send().await?;
    let status = res.status();
    let body: Value = res.json().await?;
    if !status.is_success() {
        eprintln!("Gateway reports degraded health ({})", status);
    }
    Ok(body)
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: gateway returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    print_json(&json)
}

fn print_json(value: &Value) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
