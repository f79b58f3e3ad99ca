//! Conceal Gateway command-line interface

use anyhow::Result;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use conceal_gateway_core::{ChatRequest, Config, Gateway, ProcessedRequest};
use futures::StreamExt;
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio::io::{stdout, AsyncWriteExt};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(long, global = true, default_value = "info", help = "Log level (error, warn, info, debug, trace)")]
    pub log_level: String,

    #[arg(long, global = true, help = "Path to configuration file")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan a chat completion request and print the routing decision and the rewritten request
    Inspect {
        #[arg(help = "Chat completion request body (JSON)")]
        request: PathBuf,

        #[arg(long, help = "Language hint passed to the PII analyzer")]
        language: Option<String>,
    },
    /// Process a request, then restore a recorded SSE response through the stream rewriter
    Replay {
        #[arg(long, help = "Chat completion request body (JSON)")]
        request: PathBuf,

        #[arg(long, help = "Recorded upstream SSE response")]
        response: PathBuf,

        #[arg(long, default_value_t = 64, value_parser = clap::value_parser!(u64).range(1..), help = "Bytes per upstream chunk")]
        chunk_size: u64,

        #[arg(long, help = "Language hint passed to the PII analyzer")]
        language: Option<String>,
    },
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(config_path) => {
            info!("Loading configuration from: {}", config_path.display());
            Config::from_file(config_path)?
        }
        None => match Config::get_default_config_path() {
            Ok(default_path) if default_path.exists() => {
                info!("Loading configuration from default location: {}", default_path.display());
                Config::from_file(&default_path)?
            }
            Ok(default_path) => {
                info!("Creating default configuration at: {}", default_path.display());
                let config = Config::default();
                config.to_file(&default_path)?;
                config
            }
            Err(_) => {
                info!("Using default configuration (could not determine config directory)");
                Config::default()
            }
        },
    };

    config.validate()?;
    info!("Configuration validated successfully");
    Ok(config)
}

fn read_request(path: &Path) -> Result<ChatRequest> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read request '{}': {}", path.display(), e))?;
    serde_json::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("Invalid chat completion request '{}': {}", path.display(), e))
}

fn inspect_report(processed: &ProcessedRequest) -> Result<serde_json::Value> {
    Ok(json!({
        "decision": processed.decision,
        "pii": processed.pii,
        "secrets": processed.secrets,
        "request": serde_json::to_value(&processed.request)?,
    }))
}

fn response_chunks(body: Vec<u8>, chunk_size: usize) -> Vec<Result<Bytes, std::io::Error>> {
    let body = Bytes::from(body);
    (0..body.len())
        .step_by(chunk_size)
        .map(|start| Ok(body.slice(start..(start + chunk_size).min(body.len()))))
        .collect()
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let gateway = Gateway::new(config)?;

    match args.command {
        Command::Inspect { request, language } => {
            let processed = gateway.process(read_request(&request)?, language.as_deref()).await?;
            let report = inspect_report(&processed)?;

            let mut out = stdout();
            out.write_all(serde_json::to_string_pretty(&report)?.as_bytes()).await?;
            out.write_all(b"\n").await?;
            out.flush().await?;
        }
        Command::Replay {
            request,
            response,
            chunk_size,
            language,
        } => {
            let processed = gateway.process(read_request(&request)?, language.as_deref()).await?;
            info!(
                "Routing to {}: {}",
                processed.decision.provider, processed.decision.reason
            );

            let body = std::fs::read(&response)
                .map_err(|e| anyhow::anyhow!("Failed to read response '{}': {}", response.display(), e))?;
            let chunks = response_chunks(body, chunk_size as usize);
            info!("Replaying {} chunks of up to {} bytes", chunks.len(), chunk_size);

            let mut restored = processed.rewriter.rewrite(futures::stream::iter(chunks));
            let mut out = stdout();
            while let Some(part) = restored.next().await {
                out.write_all(&part?).await?;
            }
            out.flush().await?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| {
            eprintln!("Invalid log level '{}', defaulting to 'info'", args.log_level);
            EnvFilter::new("info")
        });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting conceal-gateway");
    run(args).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_inspect_args() {
        let args = Args::try_parse_from(["conceal-gateway", "--log-level", "debug", "inspect", "req.json"]).unwrap();

        assert_eq!(args.log_level, "debug");
        assert!(args.config.is_none());
        assert!(matches!(
            args.command,
            Command::Inspect { ref request, language: None } if request == Path::new("req.json")
        ));
    }

    #[test]
    fn test_parse_replay_args() {
        let args = Args::try_parse_from([
            "conceal-gateway",
            "replay",
            "--request",
            "req.json",
            "--response",
            "resp.sse",
            "--chunk-size",
            "7",
            "--config",
            "gw.toml",
        ])
        .unwrap();

        assert_eq!(args.config, Some(PathBuf::from("gw.toml")));
        assert!(matches!(args.command, Command::Replay { chunk_size: 7, .. }));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let result = Args::try_parse_from([
            "conceal-gateway",
            "replay",
            "--request",
            "req.json",
            "--response",
            "resp.sse",
            "--chunk-size",
            "0",
        ]);

        assert!(result.is_err());
    }

    #[test]
    fn test_response_chunks_cover_body() {
        let chunks = response_chunks(b"abcdefghij".to_vec(), 4);

        let parts: Vec<Bytes> = chunks.into_iter().map(|c| c.unwrap()).collect();
        assert_eq!(parts, vec![Bytes::from("abcd"), Bytes::from("efgh"), Bytes::from("ij")]);
    }

    #[test]
    fn test_read_request_reports_bad_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{\"messages\": 3}}").unwrap();

        let err = read_request(file.path()).unwrap_err();
        assert!(err.to_string().contains("Invalid chat completion request"));
    }

    #[tokio::test]
    async fn test_inspect_report_shape() {
        let mut config = Config::default();
        config.pii.mode = conceal_gateway_core::config::DetectionMode::Regex;
        let gateway = Gateway::new(config).unwrap();

        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"model":"gpt-4o","messages":[{{"role":"user","content":"mail bob@example.org"}}]}}"#
        )
        .unwrap();

        let processed = gateway.process(read_request(file.path()).unwrap(), None).await.unwrap();
        let report = inspect_report(&processed).unwrap();

        assert_eq!(report["decision"]["provider"], "upstream");
        assert_eq!(report["request"]["model"], "gpt-4o");
        assert_eq!(
            report["request"]["messages"][0]["content"],
            "mail [[EMAIL_ADDRESS_1]]"
        );
        assert_eq!(report["pii"]["has_pii"], true);
    }

    #[test]
    fn test_load_config_from_file() {
        let file = NamedTempFile::new().unwrap();
        let mut config = Config::default();
        config.pii.score_threshold = 0.5;
        config.to_file(file.path()).unwrap();

        let loaded = load_config(Some(file.path())).unwrap();
        assert_eq!(loaded.pii.score_threshold, 0.5);
    }
}
