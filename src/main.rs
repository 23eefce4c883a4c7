use std::process::ExitCode;

use anyhow::Context;
use futures::StreamExt;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::Dispatch;
use tracing_subscriber::EnvFilter;

use xml_fetch::response::{AnalysisResponse, DownloadResponse, ErrorResponse};
use xml_fetch::{Cli, Command, ConfigManager, XmlError, XmlService};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse_args();
    let dispatch = build_dispatch(&cli);

    let config = ConfigManager::load_config(&cli)
        .await
        .context("failed to load configuration")?;
    let service = XmlService::new(config, dispatch)?;

    let outcome = match &cli.command {
        Command::Download { url } => match service.download_and_validate(url).await {
            Ok(text) => print_json(&DownloadResponse::new(text)),
            Err(err) => Err(err),
        },
        Command::Analyze { url } => match service.analyze(url).await {
            Ok(info) => print_json(&AnalysisResponse::new(info)),
            Err(err) => Err(err),
        },
        Command::Stream { url, output } => {
            let sink: Box<dyn AsyncWrite + Unpin + Send> = match output {
                Some(path) => Box::new(
                    tokio::fs::File::create(path)
                        .await
                        .with_context(|| format!("cannot create {}", path.display()))?,
                ),
                None => Box::new(tokio::io::stdout()),
            };
            relay(&service, url, sink).await
        }
    };

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            let (status, body) = ErrorResponse::from_error(&err);
            eprintln!("{}", serde_json::to_string_pretty(&body)?);
            Ok(if status == 400 {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

/// Logs go to stderr through a dispatcher owned by the service, not a global default
fn build_dispatch(cli: &Cli) -> Dispatch {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.verbosity().filter_directive()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    Dispatch::new(subscriber)
}

fn print_json<T: Serialize>(body: &T) -> Result<(), XmlError> {
    let rendered = serde_json::to_string_pretty(body)
        .map_err(|e| XmlError::Io(std::io::Error::other(e)))?;
    println!("{}", rendered);
    Ok(())
}

async fn relay(
    service: &XmlService,
    url: &str,
    mut sink: Box<dyn AsyncWrite + Unpin + Send>,
) -> Result<(), XmlError> {
    let mut stream = service.stream(url).await?;
    while let Some(chunk) = stream.next().await {
        sink.write_all(&chunk?).await?;
    }
    sink.flush().await?;
    Ok(())
}
