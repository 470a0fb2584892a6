use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;
use url::Url;

#[derive(Parser)]
#[command(name = "registry-cli")]
#[command(about = "Management CLI for the service registry", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:3004", env = "SERVICE_DISCOVERY_URL")]
    url: String,

    #[arg(
        short,
        long,
        default_value = "service-discovery-secret-change-me",
        env = "SERVICE_DISCOVERY_SECRET"
    )]
    secret: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every registered service and its instances
    Services,
    /// Show the instances of one service
    Service {
        name: String,
        /// Only show healthy instances
        #[arg(long)]
        healthy: bool,
    },
    /// Show the topic to subscriber map
    Topics,
    /// Show monitoring counters and alert states
    Stats,
    /// Zero monitoring counters and clear alert states
    ResetStats,
    /// Remove an instance from the registry
    Unregister { service: String, instance: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = Url::parse(&format!("{}/v1/discovery", cli.url.trim_end_matches('/')))?;

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.secret))?,
    );

    let res = match cli.command {
        Commands::Services => client.get(endpoint(&base, &["services"])?).send().await?,
        Commands::Service { name, healthy } => {
            let url = if healthy {
                endpoint(&base, &["services", &name, "healthy"])?
            } else {
                endpoint(&base, &["services", &name])?
            };
            client.get(url).send().await?
        }
        Commands::Topics => {
            client
                .get(endpoint(&base, &["services", "topics"])?)
                .send()
                .await?
        }
        Commands::Stats => {
            client
                .get(endpoint(&base, &["monitoring", "stats"])?)
                .send()
                .await?
        }
        Commands::ResetStats => {
            client
                .post(endpoint(&base, &["monitoring", "reset-stats"])?)
                .headers(headers)
                .send()
                .await?
        }
        Commands::Unregister { service, instance } => {
            client
                .delete(endpoint(&base, &["unregister", &service, &instance])?)
                .headers(headers)
                .send()
                .await?
        }
    };

    print_response(res).await
}

/// Append percent-encoded path segments to the API base URL.
fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, Box<dyn std::error::Error>> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| "registry URL cannot carry a path")?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: registry returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
