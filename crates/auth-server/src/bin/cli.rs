use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use shared_types::{
    HealthResponse, LoginForm, MessageResponse, OAuthStartResponse, RegisterRequest,
    TokenResponse, UserResponse,
};

#[derive(Parser)]
#[command(name = "auth-cli")]
#[command(about = "CLI for the authentication service API")]
#[command(
    long_about = "A command-line client for the authentication server.\n\n\
    Registers accounts, logs in with email and password, starts OAuth logins\n\
    and inspects the current session using a bearer token."
)]
struct Cli {
    /// Auth server URL to connect to.
    #[arg(
        short,
        long,
        default_value = "http://localhost:3000",
        env = "AUTH_API_URL"
    )]
    base_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the server is up
    Health,

    /// Create an account and print its session token
    Register {
        email: String,

        /// Between 8 and 64 characters.
        #[arg(short, long, env = "AUTH_PASSWORD", hide_env_values = true)]
        password: String,

        #[arg(short, long, value_name = "TEXT")]
        full_name: Option<String>,
    },

    /// Log in with email and password and print the session token
    Login {
        email: String,

        #[arg(short, long, env = "AUTH_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Show the user a session token belongs to
    Me {
        /// Session token as printed by `login` or `register`.
        #[arg(short, long, env = "AUTH_TOKEN", hide_env_values = true)]
        token: String,
    },

    /// Ask the server to clear the session cookie
    Logout,

    /// Print the provider authorize URL that starts an OAuth login
    OauthUrl {
        /// Registered provider name, e.g. "google".
        provider: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = cli.base_url.trim_end_matches('/');

    match cli.command {
        Commands::Health => {
            let health: HealthResponse =
                parse(client.get(format!("{}/health", base_url)).send().await?).await?;
            println!("{} at {}", health.status, health.timestamp);
        }
        Commands::Register {
            email,
            password,
            full_name,
        } => {
            let req = RegisterRequest {
                email,
                password,
                full_name,
            };
            let token: TokenResponse = parse(
                client
                    .post(format!("{}/auth/register", base_url))
                    .json(&req)
                    .send()
                    .await?,
            )
            .await?;
            println!("Registered {}", req.email);
            println!("{}", token.access_token);
        }
        Commands::Login { email, password } => {
            let form = LoginForm {
                username: email,
                password,
            };
            let token: TokenResponse = parse(
                client
                    .post(format!("{}/auth/login", base_url))
                    .form(&form)
                    .send()
                    .await?,
            )
            .await?;
            println!("{}", token.access_token);
        }
        Commands::Me { token } => {
            let user: UserResponse = parse(
                client
                    .get(format!("{}/users/me", base_url))
                    .bearer_auth(token)
                    .send()
                    .await?,
            )
            .await?;
            println!("[{}] {}", &user.id.to_string()[..8], user.email);
            if let Some(name) = &user.full_name {
                println!("    Name: {}", name);
            }
            if let Some(provider) = &user.provider {
                println!("    Provider: {}", provider);
            }
            println!("    Created: {}", user.created_at);
        }
        Commands::Logout => {
            let message: MessageResponse = parse(
                client
                    .post(format!("{}/auth/logout", base_url))
                    .send()
                    .await?,
            )
            .await?;
            println!("{}", message.message);
        }
        Commands::OauthUrl { provider } => {
            let start: OAuthStartResponse = parse(
                client
                    .get(format!(
                        "{}/auth/oauth/{}",
                        base_url,
                        urlencoding::encode(&provider)
                    ))
                    .send()
                    .await?,
            )
            .await?;
            println!("{}", start.auth_url);
        }
    }

    Ok(())
}

/// Decode a JSON body, turning error statuses into a readable message.
async fn parse<T: DeserializeOwned>(response: Response) -> anyhow::Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
            .unwrap_or(body);
        bail!("{} - {}", status, message);
    }

    response
        .json()
        .await
        .context("Failed to decode server response")
}
