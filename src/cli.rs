//! CLI argument parsing, validation, and command handlers.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use url::Url;

use crate::ClientConfig;
use crate::jwt;
use crate::session::{ClientError, RefreshPolicy, SessionController, SessionState, View};

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "timetrack",
    about = "Log in to the time tracking API and keep the session fresh"
)]
pub struct Args {
    /// API root URL
    #[arg(long, env = "TIMETRACK_API_URL", default_value = "http://localhost:8000/api")]
    pub api_url: String,

    /// Session file. Defaults to $XDG_STATE_HOME/timetrack/session.json
    #[arg(long, env = "TIMETRACK_STATE_FILE")]
    pub state_file: Option<PathBuf>,

    /// Refresh the access token when it expires within this many seconds
    #[arg(long, default_value = "300")]
    pub refresh_buffer_secs: u64,

    /// Seconds between session checks while watching
    #[arg(long, default_value = "60", value_parser = clap::value_parser!(u64).range(1..))]
    pub check_interval_secs: u64,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout_secs: u64,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Log in and store the session
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "TIMETRACK_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account
    Register {
        #[arg(long)]
        full_name: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "TIMETRACK_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Show the stored session
    Status,
    /// Check the session once, refreshing if needed. Exits 1 if it is gone
    Check,
    /// Show whether a route would render or redirect
    Gate {
        /// Route path, e.g. "/" or "/login"
        path: String,
    },
    /// Keep the session fresh until Ctrl-C or until it is lost
    Watch,
    /// Forget the stored session
    Logout,
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Parse and validate the API URL.
/// Returns None and logs an error if validation fails.
pub fn validate_api_url(api_url: &str) -> Option<Url> {
    let url = match Url::parse(api_url) {
        Ok(url) => url,
        Err(e) => {
            error!(url = %api_url, error = %e, "Invalid API URL");
            return None;
        }
    };

    if !matches!(url.scheme(), "http" | "https") {
        error!(url = %api_url, "API URL must use http or https");
        return None;
    }

    Some(url)
}

/// Default session file location, following the XDG state directory.
pub fn default_state_file() -> Option<PathBuf> {
    let state_home = std::env::var_os("XDG_STATE_HOME")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME")
                .filter(|dir| !dir.is_empty())
                .map(|home| PathBuf::from(home).join(".local").join("state"))
        })?;

    Some(state_home.join("timetrack").join("session.json"))
}

/// Build ClientConfig from validated arguments.
pub fn build_config(
    api_url: Url,
    state_file: PathBuf,
    refresh_buffer_secs: u64,
    check_interval_secs: u64,
    timeout_secs: u64,
) -> ClientConfig {
    ClientConfig {
        api_url,
        state_file,
        policy: RefreshPolicy {
            buffer: Duration::from_secs(refresh_buffer_secs),
            check_interval: Duration::from_secs(check_interval_secs),
        },
        request_timeout: Duration::from_secs(timeout_secs),
    }
}

/// Errors that end a command with a non-zero exit code.
#[derive(Debug)]
pub enum CliError {
    Client(ClientError),
    /// The session is gone and the user has to log in again
    SessionLost,
    UnknownRoute(String),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Client(e) => write!(f, "{}", e.message()),
            CliError::SessionLost => write!(f, "Session expired, please log in again"),
            CliError::UnknownRoute(path) => write!(f, "Unknown route: {}", path),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Client(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ClientError> for CliError {
    fn from(e: ClientError) -> Self {
        CliError::Client(e)
    }
}

/// Run one subcommand against the controller.
pub async fn run_command(controller: &SessionController, command: Command) -> Result<(), CliError> {
    match command {
        Command::Login { email, password } => {
            let user = controller.login(&email, &password).await?;
            println!("Logged in as {} <{}>", user.full_name, user.email);
        }
        Command::Register {
            full_name,
            email,
            password,
        } => {
            controller.register(&full_name, &email, &password).await?;
            println!("Account created for {}", email);
        }
        Command::Status => print_status(controller),
        Command::Check => {
            if !controller.check().await {
                return Err(CliError::SessionLost);
            }
            println!("Session active");
        }
        Command::Gate { path } => {
            let view = View::from_path(&path).ok_or(CliError::UnknownRoute(path))?;
            println!("{}", controller.admit(view));
        }
        Command::Watch => watch(controller).await?,
        Command::Logout => {
            controller.logout();
            println!("Logged out");
        }
    }

    Ok(())
}

fn print_status(controller: &SessionController) {
    println!("State: {}", controller.state());

    let session = controller.session();
    if let Some(user) = session.user() {
        println!("User: {} <{}>", user.full_name, user.email);
    }

    let Some(access_token) = session.access_token() else {
        return;
    };
    match jwt::remaining(access_token) {
        Some(left) => {
            let due = if jwt::is_expiring_within(access_token, controller.policy().buffer) {
                " (refresh due)"
            } else {
                ""
            };
            println!("Access token expires in {}s{}", left.as_secs(), due);
        }
        None => println!("Access token unreadable"),
    }
}

/// Keep a protected view mounted until Ctrl-C or until the session ends.
async fn watch(controller: &SessionController) -> Result<(), CliError> {
    info!(
        interval = ?controller.policy().check_interval,
        "Watching session, press Ctrl-C to stop"
    );
    watch_until(controller, tokio::signal::ctrl_c()).await
}

async fn watch_until<F: Future>(controller: &SessionController, shutdown: F) -> Result<(), CliError> {
    // Subscribed before mounting so a loss right after the mount check is seen.
    let mut states = controller.subscribe();
    let view = controller.mount_protected().await;
    if !view.is_admitted() {
        return Err(CliError::SessionLost);
    }

    tokio::pin!(shutdown);
    loop {
        if *states.borrow_and_update() == SessionState::Unauthenticated {
            return Err(CliError::SessionLost);
        }

        tokio::select! {
            _ = &mut shutdown => {
                info!("Stopped watching");
                return Ok(());
            }
            changed = states.changed() => {
                if changed.is_err() {
                    return Err(CliError::SessionLost);
                }
            }
        }
    }
}
