//! tokenpipe - command-line client for a token-authenticated backend.
//!
//! Signs in, keeps the session in the OS keychain, and sends requests
//! through the retrying, self-refreshing pipeline.

use std::io;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokenpipe_core::api::ApiRequest;
use tokenpipe_core::{Config, SessionClient};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "tokenpipe", version, about = "Authenticated API client with automatic token refresh")]
struct Cli {
    /// Backend base URL (overrides config file)
    #[arg(long, env = "TOKENPIPE_BASE_URL", global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in and store the session
    Login {
        username: String,
        #[arg(long, env = "TOKENPIPE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Create an account and store the session
    Signup {
        username: String,
        email: String,
        #[arg(long, env = "TOKENPIPE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Show the stored session
    Status,
    /// GET a path and print the JSON response
    Get { path: String },
    /// POST a JSON body to a path and print the JSON response
    Post {
        path: String,
        #[arg(long, default_value = "{}")]
        data: String,
    },
    /// Sign out and remove the stored session
    Logout,
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn prompt_password(password: Option<String>) -> Result<String> {
    match password {
        Some(password) => Ok(password),
        None => rpassword::prompt_password("Password: ").context("Failed to read password"),
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing();

    let mut config = Config::load()?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }

    let client = SessionClient::new(config)?;
    let restored = client.restore_session();
    info!(restored, "tokenpipe starting");

    match cli.command {
        Command::Login { username, password } => {
            let password = prompt_password(password)?;
            let user = client.auth().login(&username, &password).await?;
            println!("Signed in as {}", user.username);
        }
        Command::Signup {
            username,
            email,
            password,
        } => {
            let password = prompt_password(password)?;
            let user = client.auth().signup(&username, &email, &password).await?;
            println!("Account created for {}", user.username);
        }
        Command::Status => match client.tokens().snapshot() {
            Some(session) => {
                println!("Signed in as {} (id {})", session.user.username, session.user.id);
                if let Some(minutes) = session.age_minutes() {
                    println!("Session issued {}m ago", minutes);
                }
            }
            None => println!("Not signed in"),
        },
        Command::Get { path } => {
            let value = client.pipeline().send_value(ApiRequest::get(path)).await?;
            print_json(&value)?;
        }
        Command::Post { path, data } => {
            let body: Value = serde_json::from_str(&data).context("--data must be valid JSON")?;
            let value = client
                .pipeline()
                .send_value(ApiRequest::post(path).json_value(body))
                .await?;
            print_json(&value)?;
        }
        Command::Logout => {
            client.auth().sign_out().await;
            println!("Signed out");
        }
    }

    Ok(())
}
