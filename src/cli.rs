use clap::Parser;
use std::env;

use crate::error::RelayError;

/// Base URL used when neither `--api-url` nor `CHAT_API_URL` is given.
pub const DEFAULT_API_URL: &str = "https://api.dify.ai/v1";

#[derive(Parser)]
#[command(name = "chat-relay")]
#[command(version)]
#[command(about = "Bridges a Dify-compatible chat backend's SSE stream to browser clients")]
pub struct Args {
    /// Port for the relay HTTP server
    #[arg(long, default_value = "3000")]
    pub port: u16,

    /// Base URL of the upstream chat API (overrides CHAT_API_URL)
    #[arg(long)]
    pub api_url: Option<String>,

    /// App key for the upstream chat API (overrides CHAT_API_KEY)
    #[arg(long)]
    pub api_key: Option<String>,

    /// Prefix for generated user identifiers
    #[arg(long, default_value = "user")]
    pub user_prefix: String,
}

/// Resolve the upstream connection settings: command line first, then
/// environment, then (for the URL only) the hosted default. A missing key
/// is a startup error.
pub fn resolve_api_settings(args: &Args) -> Result<(String, String), RelayError> {
    resolve_api_settings_from(args, |name| env::var(name).ok())
}

fn resolve_api_settings_from(
    args: &Args,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(String, String), RelayError> {
    let url = args
        .api_url
        .clone()
        .or_else(|| lookup("CHAT_API_URL"))
        .filter(|url| !url.is_empty())
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());

    let key = args
        .api_key
        .clone()
        .or_else(|| lookup("CHAT_API_KEY"))
        .filter(|key| !key.is_empty())
        .ok_or(RelayError::MissingConfig { name: "CHAT_API_KEY" })?;

    Ok((url, key))
}
