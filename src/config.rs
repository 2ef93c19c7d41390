use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::auth::LoginField;

/// Smart Campus session client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Base URL of the campus REST API
    #[arg(short = 'u', long, env = "API_BASE_URL", default_value = "http://localhost:8000/api")]
    pub api_url: String,

    /// Field the login endpoint expects the identifier under (email, username)
    #[arg(long, env = "LOGIN_FIELD", default_value = "email")]
    pub login_field: String,

    /// Path to the session SQLite database
    #[arg(short = 'd', long, env = "SESSION_DB_FILE")]
    pub session_db: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    /// HTTP max retries for rate limiting, server and network errors
    #[arg(long, env = "HTTP_MAX_RETRIES", default_value = "2")]
    pub http_retries: u32,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Sign in and store the session
    Login {
        /// Email or username, depending on LOGIN_FIELD
        identifier: String,
        /// Password (prompted when omitted)
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Register a new student account
    Signup {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        email: String,
    },
    /// Exchange the refresh token for a new access token
    Refresh,
    /// Sign out and clear the stored session
    Logout,
    /// Show the stored session
    Status,
    /// Fetch the current user profile from the API
    Whoami,
    /// Check whether the session may open a view restricted to the given roles
    Guard {
        /// Comma-separated allowed roles (student, faculty, admin); empty allows any
        #[arg(long, value_delimiter = ',')]
        roles: Vec<String>,
    },
    /// GET an API path with the session's bearer token
    Get {
        /// Path relative to the API base URL, e.g. /clubs/
        path: String,
    },
}

/// Endpoint paths, relative to the API base URL
#[derive(Clone, Debug, PartialEq)]
pub struct AuthEndpoints {
    pub login: String,
    pub register: String,
    pub refresh: String,
    pub logout: String,
    pub current_user: String,
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self {
            login: "/auth/login/".to_string(),
            register: "/auth/register/".to_string(),
            refresh: "/auth/refresh/".to_string(),
            logout: "/auth/logout/".to_string(),
            current_user: "/auth/user/".to_string(),
        }
    }
}

/// Client-side routes the session manager and guard redirect to
#[derive(Clone, Debug, PartialEq)]
pub struct Routes {
    pub login: String,
    pub home: String,
    pub unauthorized: String,
}

impl Default for Routes {
    fn default() -> Self {
        Self {
            login: "/login".to_string(),
            home: "/".to_string(),
            unauthorized: "/".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    // API
    pub api_base_url: String,
    pub endpoints: AuthEndpoints,
    pub login_field: LoginField,

    // Storage
    pub session_db: PathBuf,

    // Navigation
    pub routes: Routes,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,
    pub http_max_retries: u32,
    pub http_retry_base_delay_ms: u64,

    pub log_level: String,
}

impl Config {
    /// Defaults for everything except the API base URL
    pub fn with_base_url(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            endpoints: AuthEndpoints::default(),
            login_field: LoginField::Email,
            session_db: default_session_db(),
            routes: Routes::default(),
            http_connect_timeout: 10,
            http_request_timeout: 30,
            http_max_retries: 2,
            http_retry_base_delay_ms: 500,
            log_level: "info".to_string(),
        }
    }

    /// Build configuration with priority: CLI > ENV > defaults
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let defaults = AuthEndpoints::default();
        let default_routes = Routes::default();

        let config = Config {
            api_base_url: args.api_url.trim_end_matches('/').to_string(),

            endpoints: AuthEndpoints {
                login: env_or("AUTH_LOGIN_PATH", defaults.login),
                register: env_or("AUTH_REGISTER_PATH", defaults.register),
                refresh: env_or("AUTH_REFRESH_PATH", defaults.refresh),
                logout: env_or("AUTH_LOGOUT_PATH", defaults.logout),
                current_user: env_or("AUTH_USER_PATH", defaults.current_user),
            },

            login_field: parse_login_field(&args.login_field)?,

            session_db: args
                .session_db
                .as_deref()
                .map(expand_tilde)
                .unwrap_or_else(default_session_db),

            routes: Routes {
                login: env_or("LOGIN_ROUTE", default_routes.login),
                home: env_or("HOME_ROUTE", default_routes.home),
                unauthorized: env_or("UNAUTHORIZED_ROUTE", default_routes.unauthorized),
            },

            http_connect_timeout: std::env::var("HTTP_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),

            http_request_timeout: args.http_timeout,

            http_max_retries: args.http_retries,

            http_retry_base_delay_ms: std::env::var("HTTP_RETRY_BASE_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(500),

            log_level: args.log_level.clone(),
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://"))
        {
            anyhow::bail!(
                "API_BASE_URL must start with http:// or https://, got: {}",
                self.api_base_url
            );
        }

        Ok(())
    }

    /// Absolute URL for an API path
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if path.starts_with('/') {
            format!("{}{}", self.api_base_url, path)
        } else {
            format!("{}/{}", self.api_base_url, path)
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
}

/// Default database location under the user's data directory
fn default_session_db() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("campus-session")
        .join("session.sqlite3")
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Parse the login identifier field from string
fn parse_login_field(s: &str) -> Result<LoginField> {
    match s.trim().to_lowercase().as_str() {
        "email" | "" => Ok(LoginField::Email),
        "username" => Ok(LoginField::Username),
        other => anyhow::bail!(
            "LOGIN_FIELD must be 'email' or 'username', got: {}",
            other
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde() {
        let path = expand_tilde("~/test/session.sqlite3");
        assert!(path.to_string_lossy().contains("test/session.sqlite3"));
        assert!(!path.to_string_lossy().starts_with("~"));

        let path = expand_tilde("/absolute/path");
        assert_eq!(path, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_expand_tilde_just_tilde() {
        let path = expand_tilde("~");
        assert_eq!(path, PathBuf::from("~"));
    }

    #[test]
    fn test_parse_login_field() {
        assert_eq!(parse_login_field("email").unwrap(), LoginField::Email);
        assert_eq!(parse_login_field("USERNAME").unwrap(), LoginField::Username);
        assert_eq!(parse_login_field("").unwrap(), LoginField::Email);
        assert!(parse_login_field("phone").is_err());
    }

    #[test]
    fn test_with_base_url_defaults() {
        let config = Config::with_base_url("https://campus.example.edu/api/");
        assert_eq!(config.api_base_url, "https://campus.example.edu/api");
        assert_eq!(config.endpoints.refresh, "/auth/refresh/");
        assert_eq!(config.routes.login, "/login");
        assert_eq!(config.routes.home, "/");
        assert_eq!(config.login_field, LoginField::Email);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_url_joining() {
        let config = Config::with_base_url("http://localhost:8000/api");
        assert_eq!(config.url("/clubs/"), "http://localhost:8000/api/clubs/");
        assert_eq!(config.url("events/"), "http://localhost:8000/api/events/");
        assert_eq!(config.url("https://other.host/x"), "https://other.host/x");
    }

    #[test]
    fn test_validate_rejects_non_http_url() {
        let config = Config::with_base_url("ftp://campus.example.edu");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_args() {
        let args = CliArgs::parse_from([
            "campus-session",
            "--api-url",
            "https://campus.example.edu/api/",
            "--login-field",
            "username",
            "--session-db",
            "/tmp/campus/session.sqlite3",
            "status",
        ]);
        let config = Config::from_args(&args).unwrap();
        assert_eq!(config.api_base_url, "https://campus.example.edu/api");
        assert_eq!(config.login_field, LoginField::Username);
        assert_eq!(config.session_db, PathBuf::from("/tmp/campus/session.sqlite3"));
        assert!(matches!(args.command, Command::Status));
    }

    #[test]
    fn test_guard_roles_are_comma_separated() {
        let args = CliArgs::parse_from(["campus-session", "guard", "--roles", "faculty,admin"]);
        match args.command {
            Command::Guard { roles } => assert_eq!(roles, vec!["faculty", "admin"]),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
