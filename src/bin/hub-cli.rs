use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser)]
#[command(name = "hub-cli")]
#[command(about = "Management CLI for the live chat hub", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "HUB_ADMIN_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check hub status and registry counts
    Status,
    /// List live visitor sessions
    Online,
    /// List legacy TCP clients
    Tcp,
    /// Clear the legacy TCP registry
    ClearTcp,
    /// Blacklist an IP address
    Block { ip: String },
    /// Remove an IP address from the blacklist
    Unblock { ip: String },
    /// Connect as an agent and print every event received
    Watch {
        /// Agent bearer token
        #[arg(short, long, env = "HUB_AGENT_TOKEN")]
        token: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let request = match cli.command {
        Commands::Status => client.get(format!("{base}/admin/status")),
        Commands::Online => client.get(format!("{base}/admin/online")),
        Commands::Tcp => client.get(format!("{base}/admin/tcp")),
        Commands::ClearTcp => client.delete(format!("{base}/admin/tcp")),
        Commands::Block { ip } => client
            .post(format!("{base}/admin/blacklist"))
            .json(&serde_json::json!({ "ip": ip })),
        Commands::Unblock { ip } => client.delete(format!("{base}/admin/blacklist/{ip}")),
        Commands::Watch { token } => return watch(base, &token).await,
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn watch(base: &str, token: &str) -> Result<(), Box<dyn std::error::Error>> {
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    let mut url = url::Url::parse(&format!("{ws_base}/ws_kefu"))?;
    url.query_pairs_mut().append_pair("token", token);

    let (mut socket, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
    eprintln!("Connected to {ws_base}/ws_kefu, waiting for events (ctrl-c to stop)");

    while let Some(frame) = socket.next().await {
        match frame? {
            Message::Text(text) => match serde_json::from_str::<Value>(text.as_str()) {
                Ok(json) => println!("{}", serde_json::to_string(&json)?),
                Err(_) => println!("{}", text.as_str()),
            },
            Message::Close(frame) => {
                eprintln!("Closed by hub: {frame:?}");
                break;
            }
            _ => {}
        }
    }
    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
