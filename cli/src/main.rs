use std::path::PathBuf;
use std::process::ExitCode;

use authgate::config::ConfigError;
use authgate::store::FileCookieJar;
use authgate::{AuthConfig, HttpAuthApi, SessionError, SessionManager, TokenStore};
use clap::{Parser, Subcommand};
use reqwest::header::{AUTHORIZATION, HeaderValue};
use serde_json::Value;
use tracing_subscriber::EnvFilter;


const JAR_FILE: &str = "cookies.json";

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("{message} [{code}]")]
    Session { message: String, code: &'static str },
    #[error("not logged in; run `authgate-cli login` first")]
    NotLoggedIn,
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
    #[error("server returned HTTP {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl From<SessionError> for CliError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NoStoredTokens => Self::NotLoggedIn,
            other => Self::Session {
                message: other.user_message(),
                code: other.error_code(),
            },
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "authgate-cli", about = "Sign in to a JWT API and keep the session in a local cookie jar")]
struct Cli {
    /// Base URL the `user/...` endpoints hang off. Overrides `AUTH_API_BASE_URL`.
    #[arg(long, env = "AUTHGATE_API_URL")]
    api_url: Option<String>,

    /// Cookie jar path. Defaults to `$HOME/.config/authgate/cookies.json`.
    #[arg(long, env = "AUTHGATE_JAR")]
    jar: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Exchange email + password for a token pair.
    Login {
        email: String,
        #[arg(long, env = "AUTHGATE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account and sign in with it.
    Register {
        #[arg(long)]
        full_name: String,
        email: String,
        #[arg(long, env = "AUTHGATE_PASSWORD", hide_env_values = true)]
        password: String,
        /// Confirmation; defaults to `--password`.
        #[arg(long, hide_env_values = true)]
        password2: Option<String>,
    },
    /// Forget the stored tokens.
    Logout,
    /// Restore the session from the jar and print the signed-in identity.
    Whoami,
    /// Force a token refresh.
    Refresh,
    /// Print a valid access token, refreshing if needed.
    Token,
    /// Request a password-reset link for an account.
    ResetPassword { email: String },
    /// Authenticated GET against the API base URL.
    Get { path: String },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = resolve_config(AuthConfig::from_env()?, cli.api_url);
    let jar_path = cli.jar.unwrap_or_else(|| default_jar_path(std::env::var_os("HOME").map(PathBuf::from)));
    tracing::debug!(jar = %jar_path.display(), api = %config.api_base_url, "session configured");
    let api = HttpAuthApi::new(&config).map_err(SessionError::from)?;
    let manager = SessionManager::new(api, FileCookieJar::new(jar_path, config.cookies));

    match cli.command {
        Command::Login { email, password } => {
            let identity = manager.login(&email, &password).await?;
            eprintln!("Login successful");
            print_json(&serde_json::to_value(identity)?)
        }
        Command::Register {
            full_name,
            email,
            password,
            password2,
        } => {
            let confirm = password2.unwrap_or_else(|| password.clone());
            let identity = manager.register(&full_name, &email, &password, &confirm).await?;
            eprintln!("Registration successful");
            print_json(&serde_json::to_value(identity)?)
        }
        Command::Logout => {
            manager.logout();
            eprintln!("Logout successful");
            Ok(())
        }
        Command::Whoami => {
            let identity = manager.hydrate().await?;
            print_json(&serde_json::to_value(identity)?)
        }
        Command::Refresh => {
            manager.refresh().await?;
            let identity = manager.hydrate().await?;
            eprintln!("Token refreshed");
            print_json(&serde_json::to_value(identity)?)
        }
        Command::Token => {
            println!("{}", manager.access_token().await?);
            Ok(())
        }
        Command::ResetPassword { email } => {
            let reset = manager.request_password_reset(&email).await?;
            eprintln!("Password reset requested");
            print_json(&serde_json::to_value(reset)?)
        }
        Command::Get { path } => run_get(&manager, &path).await,
    }
}

/// Authenticated GET sent through the session's configured HTTP client.
async fn run_get<S: TokenStore>(manager: &SessionManager<HttpAuthApi, S>, path: &str) -> Result<(), CliError> {
    let bearer = manager.bearer().await?;
    let url = authgate::api::endpoint_url(manager.api().base_url(), path);

    let response = manager
        .api()
        .client()
        .get(&url)
        .header(AUTHORIZATION, HeaderValue::from_str(&bearer)?)
        .send()
        .await?;
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(CliError::ServerError {
            status: status.as_u16(),
            body,
        });
    }
    match serde_json::from_str::<Value>(&body) {
        Ok(json) => print_json(&json),
        Err(_) => {
            println!("{body}");
            Ok(())
        }
    }
}

fn resolve_config(mut config: AuthConfig, api_url: Option<String>) -> AuthConfig {
    if let Some(url) = api_url {
        config.api_base_url = url;
    }
    config
}

fn default_jar_path(home: Option<PathBuf>) -> PathBuf {
    match home {
        Some(home) => home.join(".config").join("authgate").join(JAR_FILE),
        None => PathBuf::from(format!(".authgate-{JAR_FILE}")),
    }
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
