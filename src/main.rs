use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use tutor_pipeline::config::TutorConfig;
use tutor_pipeline::logging::init_tracing;
use tutor_pipeline::{TurnRequest, TurnResponse, TutorService};

/// Reads newline-delimited JSON turn requests from stdin and writes one JSON
/// turn response per line to stdout.
#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = TutorConfig::from_env();
    let _log_guard = init_tracing(&config.log_level);

    let service = match TutorService::from_config(config).await {
        Ok(service) => service,
        Err(err) => {
            tracing::error!(error = %err, "failed to initialize tutor service");
            std::process::exit(1);
        }
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                tracing::error!(error = %err, "failed to read stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<TurnRequest>(&line) {
            Ok(request) => service.process_turn(request).await,
            Err(err) => {
                tracing::warn!(error = %err, "malformed turn request");
                TurnResponse::fallback("", uuid::Uuid::new_v4().to_string())
            }
        };

        match serde_json::to_string(&response) {
            Ok(mut json) => {
                json.push('\n');
                if let Err(err) = stdout.write_all(json.as_bytes()).await {
                    tracing::error!(error = %err, "failed to write response");
                    break;
                }
                let _ = stdout.flush().await;
            }
            Err(err) => tracing::error!(error = %err, "failed to encode response"),
        }
    }

    service.shutdown().await;
    tracing::info!("tutor pipeline stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
