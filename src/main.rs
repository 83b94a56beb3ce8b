mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use commands::{Command, CommandError};
use kassa_client::config::{Config, TokenStoreKind};

/// Command-line client for the Kassa point-of-sale API.
#[derive(Parser, Debug)]
#[command(name = "kassa", version)]
struct Args {
    /// API base URL (overrides KASSA_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Token store: keychain, file or memory (overrides KASSA_TOKEN_STORE)
    #[arg(long, global = true)]
    token_store: Option<TokenStoreKind>,

    /// Token file path for the file store (overrides KASSA_TOKEN_FILE)
    #[arg(long, global = true)]
    token_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::debug!("Command failed: {:?}", e);
            eprintln!("error: {}", e.report());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(args: Args) -> Result<(), CommandError> {
    // Environment (and .env) first, then command-line overrides
    let mut config = Config::from_env()?;
    if let Some(url) = args.api_url {
        config.api_url = url.trim_end_matches('/').to_string();
    }
    if let Some(kind) = args.token_store {
        config.token_store = kind;
    }
    if let Some(path) = args.token_file {
        config.token_file = Some(path);
    }
    log::debug!("Using API base {}", config.api_url);

    let client = config.build_client()?;
    let output = commands::execute(&client, args.command).await?;

    let rendered = serde_json::to_string_pretty(&output)
        .map_err(|e| CommandError::Input(e.to_string()))?;
    println!("{}", rendered);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_after_subcommand() {
        let args = Args::try_parse_from([
            "kassa",
            "get",
            "products?page=2",
            "--api-url",
            "http://pos/api",
            "--token-store",
            "memory",
        ])
        .unwrap();
        assert_eq!(args.api_url.as_deref(), Some("http://pos/api"));
        assert_eq!(args.token_store, Some(TokenStoreKind::Memory));
        assert!(matches!(args.command, Command::Get { ref path } if path == "products?page=2"));
    }

    #[test]
    fn upload_requires_a_file() {
        assert!(Args::try_parse_from(["kassa", "upload", "/products/1/image"]).is_err());

        let args = Args::try_parse_from([
            "kassa",
            "upload",
            "/products/1/image",
            "--file",
            "image=photo.png",
            "--field",
            "alt=Front",
        ])
        .unwrap();
        match args.command {
            Command::Upload { files, fields, .. } => {
                assert_eq!(files, vec![("image".to_string(), PathBuf::from("photo.png"))]);
                assert_eq!(fields, vec![("alt".to_string(), "Front".to_string())]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
