mod api;
mod channel;
mod commands;
mod config;
mod db;
mod handlers;
mod models;
mod tasks;
mod voting;

use api::PollApi;
use channel::{socket::SocketConnector, LiveChannel};
use clap::Parser;
use commands::{App, Route};
use config::Config;
use db::VoteStateStore;
use log::{error, info};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Create polls and vote on them with live results.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Page to open: `/`, `/polls/<id>` or a full share link
    #[arg(default_value = "/")]
    target: String,

    /// Backend base URL, overrides POLL_BACKEND_URL
    #[arg(long)]
    backend_url: Option<String>,
}

#[tokio::main]
async fn main() {
    // Initialize logging
    dotenvy::dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();

    let config = match Config::from_env(cli.backend_url.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };

    let store = match VoteStateStore::connect(&config.state_db_url, &config.app_origin).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open vote state database: {}", e);
            return;
        }
    };

    let api = match PollApi::new(&config.backend_url) {
        Ok(api) => Arc::new(api),
        Err(e) => {
            error!("Failed to set up the poll API client: {}", e);
            return;
        }
    };

    let connector = match SocketConnector::new(&config.socket_url) {
        Ok(connector) => connector,
        Err(e) => {
            error!("Invalid live update endpoint: {}", e);
            return;
        }
    };
    info!(
        "Backend {}, live updates at {}, vote state for {}",
        config.backend_url,
        connector.endpoint(),
        store.origin()
    );

    let app = App {
        api,
        channel: LiveChannel::new(Arc::new(connector)),
        store,
        origin: config.app_origin.clone(),
    };

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut out = std::io::stdout();
    if let Err(e) = commands::run(&app, Route::parse(&cli.target), &mut input, &mut out).await {
        error!("{}", e);
    }
}
