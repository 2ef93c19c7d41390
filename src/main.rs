use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::Password;
use std::sync::Arc;

use campus_session::auth::{LogNavigator, Role, SessionManager, SignupForm, SqliteSessionStore};
use campus_session::config::{CliArgs, Command, Config};
use campus_session::guard::{GuardDecision, RouteGuard};
use campus_session::http_client::ApiClient;

#[tokio::main]
async fn main() -> Result<()> {
    // .env values feed the clap env fallbacks
    dotenvy::dotenv().ok();

    let args = CliArgs::parse();
    let config = Config::from_args(&args)?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::debug!(
        api = %config.api_base_url,
        session_db = %config.session_db.display(),
        "Configuration loaded"
    );

    let store = Arc::new(SqliteSessionStore::open(&config.session_db)?);
    let session = SessionManager::new(config, store, Arc::new(LogNavigator))?;
    session.initialize().await;

    match args.command {
        Command::Login {
            identifier,
            password,
        } => {
            let password = match password {
                Some(p) => p,
                None => Password::new()
                    .with_prompt("Password")
                    .interact()
                    .context("Failed to read password")?,
            };
            let user = session.login(&identifier, &password).await?;
            println!("Signed in as {} ({})", user.display_name(), user.role);
        }

        Command::Signup {
            first_name,
            last_name,
            email,
        } => {
            let password: String = Password::new()
                .with_prompt("Password")
                .interact()
                .context("Failed to read password")?;
            let confirm_password: String = Password::new()
                .with_prompt("Confirm password")
                .interact()
                .context("Failed to read password confirmation")?;

            let form = SignupForm {
                first_name,
                last_name,
                email,
                password,
                confirm_password,
            };
            session.signup(&form).await?;
            println!("Account created. Sign in with `campus-session login {}`", form.email);
        }

        Command::Refresh => {
            session.refresh().await?;
            print_status(&session).await;
        }

        Command::Logout => {
            session.logout().await;
            println!("Signed out");
        }

        Command::Status => print_status(&session).await,

        Command::Whoami => {
            let api = ApiClient::new(session.clone())?;
            let user = api.current_user().await?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }

        Command::Guard { roles } => {
            let allowed = roles
                .iter()
                .filter(|r| !r.trim().is_empty())
                .map(|r| r.parse::<Role>().map_err(anyhow::Error::msg))
                .collect::<Result<Vec<_>>>()?;
            let allowed = if allowed.is_empty() {
                None
            } else {
                Some(allowed.as_slice())
            };

            match RouteGuard::new(session.clone()).check(allowed).await {
                GuardDecision::Allow => println!("allow"),
                GuardDecision::Redirect(to) => {
                    println!("redirect {}", to);
                    std::process::exit(2);
                }
            }
        }

        Command::Get { path } => {
            let api = ApiClient::new(session.clone())?;
            let body: serde_json::Value = api.get(&path).await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }

    Ok(())
}

/// Print the session summary
async fn print_status(session: &SessionManager) {
    let state = session.state().await;

    if !state.is_authenticated() {
        println!("  Authenticated: no");
        if let Some(error) = state.error {
            println!("  Last error:    {}", error);
        }
        return;
    }

    println!("  Authenticated: yes");
    if let Some(user) = &state.user {
        println!("  User:          {} <{}>", user.display_name(), user.email);
    }
    if let Some(role) = state.role {
        println!("  Role:          {}", role);
    }
    if let Some(expires_at) = state.claims.as_ref().and_then(|c| c.expires_at()) {
        println!("  Expires:       {}", expires_at.to_rfc3339());
    }
    println!(
        "  Refreshable:   {}",
        if state.refresh_token.is_some() { "yes" } else { "no" }
    );
}
