use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "shield-cli")]
#[command(about = "Management CLI for the route-shield admin API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[arg(short, long, env = "SHIELD_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show per-policy limiter state
    Status,
    /// Dump the security audit logs
    AuditLogs,
    /// List currently blocked clients
    Blocked,
    /// Lift all blocks on a client IP
    Unblock { ip: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::builder()
        .user_agent(concat!("shield-cli/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let (method, path) = match &cli.command {
        Commands::Status => (Method::GET, "/admin/status".to_string()),
        Commands::AuditLogs => (Method::GET, "/admin/audit-logs".to_string()),
        Commands::Blocked => (Method::GET, "/admin/blocked".to_string()),
        Commands::Unblock { ip } => (Method::DELETE, format!("/admin/blocked/{ip}")),
    };

    let res = client
        .request(method, format!("{}{}", cli.url.trim_end_matches('/'), path))
        .headers(headers)
        .send()
        .await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;

    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if !text.is_empty() {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = serde_json::from_str(&text)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
