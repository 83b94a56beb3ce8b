//! Command handlers for the `kassa` binary.
//!
//! Each subcommand is a thin wrapper over one library call; results are
//! returned as JSON for `main` to print.

use std::path::PathBuf;

use clap::Subcommand;
use serde_json::{json, Value};
use thiserror::Error;

use kassa_client::api::{auth, ApiClient, ApiError, UploadForm};
use kassa_client::config::ConfigError;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Log in and store the returned tokens
    Login {
        #[arg(long)]
        login: String,
        /// Falls back to KASSA_PASSWORD
        #[arg(long, env = "KASSA_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Forget the stored tokens
    Logout,
    /// Show the logged-in user's profile
    Whoami,
    /// GET a path under the API base
    Get { path: String },
    /// DELETE a path under the API base
    Delete { path: String },
    /// POST a JSON body
    Post { path: String, body: String },
    /// PUT a JSON body
    Put { path: String, body: String },
    /// POST a multipart form
    Upload {
        path: String,
        /// File field as NAME=PATH (repeatable)
        #[arg(long = "file", value_parser = parse_file_arg, required = true)]
        files: Vec<(String, PathBuf)>,
        /// Text field as NAME=VALUE (repeatable)
        #[arg(long = "field", value_parser = parse_field_arg)]
        fields: Vec<(String, String)>,
    },
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Input(String),
}

impl CommandError {
    /// Process exit status: 1 for HTTP errors, 2 for network/aborted, 3 for
    /// local failures.
    pub fn exit_code(&self) -> u8 {
        match self {
            CommandError::Api(e) if e.as_http().is_some() => 1,
            CommandError::Api(e) if e.is_network() => 2,
            _ => 3,
        }
    }

    /// What to print for the user.
    pub fn report(&self) -> String {
        match self {
            CommandError::Api(e) if e.is_session_expired() => {
                format!("{} (session ended, run `kassa login`)", e.message())
            }
            CommandError::Api(ApiError::Http(e)) => format!("HTTP {}: {}", e.status, e.message),
            other => other.to_string(),
        }
    }
}

/// Run one subcommand against `client`.
pub async fn execute(client: &ApiClient, command: Command) -> Result<Value, CommandError> {
    match command {
        Command::Login { login, password } => {
            let password = password.ok_or_else(|| {
                CommandError::Input("password required (--password or KASSA_PASSWORD)".to_string())
            })?;
            let session = auth::login(client, &login, &password).await?;
            Ok(json!({
                "logged_in": login,
                "token_type": session.token_type,
                "refreshable": session.refreshable,
            }))
        }
        Command::Logout => {
            auth::logout(client)?;
            Ok(json!({"logged_out": true}))
        }
        Command::Whoami => {
            let user = auth::me(client).await?;
            serde_json::to_value(user).map_err(|e| CommandError::Input(e.to_string()))
        }
        Command::Get { path } => Ok(client.get(&path).await?),
        Command::Delete { path } => Ok(client.delete(&path).await?),
        Command::Post { path, body } => {
            let body = parse_json_arg(&body)?;
            Ok(client.post(&path, &body).await?)
        }
        Command::Put { path, body } => {
            let body = parse_json_arg(&body)?;
            Ok(client.put(&path, &body).await?)
        }
        Command::Upload {
            path,
            files,
            fields,
        } => {
            let mut form = fields
                .into_iter()
                .fold(UploadForm::new(), |form, (name, value)| form.text(name, value));
            for (name, file) in files {
                form = form.file_from_path(name, &file).await.map_err(|e| {
                    CommandError::Input(format!("Cannot read {}: {}", file.display(), e))
                })?;
            }
            Ok(client.upload(&path, &form).await?)
        }
    }
}

fn parse_json_arg(raw: &str) -> Result<Value, CommandError> {
    serde_json::from_str(raw).map_err(|e| CommandError::Input(format!("Body is not valid JSON: {}", e)))
}

fn split_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got '{}'", raw)),
    }
}

fn parse_field_arg(raw: &str) -> Result<(String, String), String> {
    split_pair(raw)
}

fn parse_file_arg(raw: &str) -> Result<(String, PathBuf), String> {
    split_pair(raw).map(|(name, path)| (name, PathBuf::from(path)))
}
