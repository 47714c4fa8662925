//! Finance API command-line client
//!
//! Thin shell over `api_client::ApiClient`:
//! 1. Loads TOML configuration and opens the session file
//! 2. Runs one command (login, logout, whoami, or a raw API verb)
//! 3. Prints the decoded JSON response to stdout
//!
//! Token refresh and retries happen inside the client; session events raised
//! during the command are logged before exit.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use api_client::{ApiClient, SessionEvent, UploadForm};
use serde_json::Value;
use session_store::FileCredentialStore;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

const USAGE: &str = "usage: finance-cli [--config <path>] <command>

commands:
  login <email>                      password is read from FINANCE_PASSWORD
  logout
  whoami
  get <path> [key=value...]
  delete <path>
  post|put|patch <path> <json>
  upload <path> <file> [key=value...]";

/// One CLI invocation.
#[derive(Debug, PartialEq)]
enum Command {
    Login { email: String },
    Logout,
    Whoami,
    Get { path: String, query: Vec<(String, String)> },
    Delete { path: String },
    Send { method: String, path: String, body: Value },
    Upload { path: String, file: PathBuf, fields: Vec<(String, String)> },
}

fn parse_pairs(args: &[String]) -> Result<Vec<(String, String)>> {
    args.iter()
        .map(|arg| {
            arg.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .with_context(|| format!("expected key=value, got: {arg}"))
        })
        .collect()
}

/// Parse positional arguments (after `--config` has been removed).
fn parse_command(args: &[String]) -> Result<Command> {
    let Some((name, rest)) = args.split_first() else {
        bail!("{USAGE}");
    };

    let command = match (name.as_str(), rest) {
        ("login", [email]) => Command::Login {
            email: email.clone(),
        },
        ("logout", []) => Command::Logout,
        ("whoami", []) => Command::Whoami,
        ("get", [path, pairs @ ..]) => Command::Get {
            path: path.clone(),
            query: parse_pairs(pairs)?,
        },
        ("delete", [path]) => Command::Delete { path: path.clone() },
        ("post" | "put" | "patch", [path, body]) => Command::Send {
            method: name.clone(),
            path: path.clone(),
            body: serde_json::from_str(body)
                .with_context(|| format!("request body is not valid JSON: {body}"))?,
        },
        ("upload", [path, file, pairs @ ..]) => Command::Upload {
            path: path.clone(),
            file: PathBuf::from(file),
            fields: parse_pairs(pairs)?,
        },
        _ => bail!("{USAGE}"),
    };
    Ok(command)
}

/// Split `--config <path>` out of the raw arguments.
fn split_config_flag(args: &[String]) -> (Option<String>, Vec<String>) {
    let mut config = None;
    let mut rest = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            config = iter.next().cloned();
        } else {
            rest.push(arg.clone());
        }
    }
    (config, rest)
}

async fn run(client: &ApiClient, command: Command) -> Result<Value> {
    let value = match command {
        Command::Login { email } => {
            let password = std::env::var("FINANCE_PASSWORD")
                .context("FINANCE_PASSWORD must be set to log in")?;
            let profile = client.login(&email, &password).await?;
            profile.unwrap_or(Value::Null)
        }
        Command::Logout => {
            client.logout().await?;
            Value::Null
        }
        Command::Whoami => {
            if !client.is_authenticated().await {
                bail!("not logged in");
            }
            client.profile().await.unwrap_or(Value::Null)
        }
        Command::Get { path, query } => {
            let query: Vec<(&str, &str)> = query
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            client.get_with_query(&path, &query).await?
        }
        Command::Delete { path } => client.delete(&path).await?,
        Command::Send { method, path, body } => match method.as_str() {
            "post" => client.post(&path, &body).await?,
            "put" => client.put(&path, &body).await?,
            _ => client.patch(&path, &body).await?,
        },
        Command::Upload { path, file, fields } => {
            let contents = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload".to_string());

            let mut form = UploadForm::new(file_name, contents).on_progress(|fraction| {
                tracing::debug!(percent = (fraction * 100.0).round() as u64, "upload progress");
            });
            for (name, value) in fields {
                form = form.field(name, value);
            }
            client.upload_file(&path, form).await?
        }
    };
    Ok(value)
}

/// Log session events raised during the command. Returns true when the
/// session expired.
fn drain_session_events(events: &mut broadcast::Receiver<SessionEvent>) -> bool {
    let mut expired = false;
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::SessionExpired { reason } => {
                warn!(%reason, "session expired, run `finance-cli login` again");
                expired = true;
            }
            other => info!(event = ?other, "session event"),
        }
    }
    expired
}

#[tokio::main]
async fn main() -> Result<()> {
    // LOG_LEVEL / RUST_LOG filter; LOG_FORMAT=json for machine-readable output
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (cli_config_path, positional) = split_config_flag(&args);
    let command = parse_command(&positional)?;

    let config_path = Config::resolve_path(cli_config_path.as_deref());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    info!(
        base_url = %config.api.base_url,
        timeout_secs = config.api.timeout_secs,
        max_retries = config.retry.max_retries,
        "configuration loaded"
    );

    let store = FileCredentialStore::open(config.session.credentials_path.clone())
        .await
        .with_context(|| {
            format!(
                "failed to open session file {}",
                config.session.credentials_path.display()
            )
        })?;
    let client = ApiClient::from_config(&config.client_config(), Arc::new(store))
        .context("failed to build API client")?;

    let mut events = client.subscribe();
    let outcome = run(&client, command).await;
    drain_session_events(&mut events);

    let value = outcome?;
    if !value.is_null() {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_split_config_flag() {
        let (config, rest) = split_config_flag(&args(&["--config", "/etc/f.toml", "whoami"]));
        assert_eq!(config.as_deref(), Some("/etc/f.toml"));
        assert_eq!(rest, args(&["whoami"]));

        let (config, rest) = split_config_flag(&args(&["get", "/budgets"]));
        assert!(config.is_none());
        assert_eq!(rest, args(&["get", "/budgets"]));
    }

    #[test]
    fn test_parse_get_with_query() {
        let command = parse_command(&args(&["get", "/transactions", "month=2026-09"])).unwrap();
        assert_eq!(
            command,
            Command::Get {
                path: "/transactions".into(),
                query: vec![("month".into(), "2026-09".into())],
            }
        );
    }

    #[test]
    fn test_parse_send_requires_json() {
        let command =
            parse_command(&args(&["patch", "/budgets/1", r#"{"limit":450}"#])).unwrap();
        assert_eq!(
            command,
            Command::Send {
                method: "patch".into(),
                path: "/budgets/1".into(),
                body: serde_json::json!({"limit": 450}),
            }
        );

        assert!(parse_command(&args(&["post", "/budgets", "{not json"])).is_err());
    }

    #[test]
    fn test_parse_upload_fields() {
        let command =
            parse_command(&args(&["upload", "/imports", "march.csv", "accountId=acc_1"]))
                .unwrap();
        assert_eq!(
            command,
            Command::Upload {
                path: "/imports".into(),
                file: PathBuf::from("march.csv"),
                fields: vec![("accountId".into(), "acc_1".into())],
            }
        );
    }

    #[test]
    fn test_parse_rejects_unknown_or_malformed() {
        assert!(parse_command(&[]).is_err());
        assert!(parse_command(&args(&["transfer", "/x"])).is_err());
        assert!(parse_command(&args(&["login"])).is_err());
        assert!(parse_command(&args(&["get", "/budgets", "month"])).is_err());
    }

    #[test]
    fn test_drain_reports_expired_session() {
        let (tx, mut rx) = broadcast::channel(4);
        tx.send(SessionEvent::Refreshed).unwrap();
        tx.send(SessionEvent::SessionExpired {
            reason: "refresh token revoked".into(),
        })
        .unwrap();

        assert!(drain_session_events(&mut rx));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_drain_without_expiry() {
        let (tx, mut rx) = broadcast::channel(4);
        tx.send(SessionEvent::LoggedIn).unwrap();
        assert!(!drain_session_events(&mut rx));

        drop(tx);
        assert!(!drain_session_events(&mut rx));
    }
}
