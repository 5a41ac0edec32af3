use clap::Parser;
use tracing_subscriber::EnvFilter;

use chat_relay::cli::{self, Args};
use chat_relay::{web, ChatRelay};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let (api_url, api_key) = cli::resolve_api_settings(&args)?;

    let relay = ChatRelay::new(api_url, api_key);
    web::serve(relay, args.port, args.user_prefix).await?;

    Ok(())
}
