mod config;
mod input;
mod logging;
mod render;

use std::{process::ExitCode, sync::Arc};

use chat_core::{ChatEngine, Intent, RuntimeHandle, spawn_runtime};
use chat_http::HttpBackend;
use config::ChatliConfig;
use input::LineCommand;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::{debug, error, info, warn};

const INTENT_BUFFER: usize = 64;

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    info!("starting chatli");

    let config = match ChatliConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "chatli config invalid");
            return ExitCode::FAILURE;
        }
    };
    let backend = match HttpBackend::new(config.backend_config()) {
        Ok(backend) => backend,
        Err(err) => {
            error!(error = %err, "failed to build backend client");
            return ExitCode::FAILURE;
        }
    };
    info!(server = %config.server_url, "using chat server");

    let engine = ChatEngine::new(Arc::new(backend), config.engine_config());
    let handle = spawn_runtime(engine, INTENT_BUFFER, config.event_buffer);

    run(&handle, &config).await;

    handle.shutdown().await;
    info!("chatli exited");
    ExitCode::SUCCESS
}

async fn run(handle: &RuntimeHandle, config: &ChatliConfig) {
    let mut snapshots = handle.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut last_frame = String::new();

    if let Some(username) = &config.prefill_username {
        let prefill = [Intent::Input(username.clone()), Intent::Submit];
        if !send_all(handle, prefill).await {
            return;
        }
    }

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => match input::parse_line(&line) {
                    LineCommand::Quit => {
                        info!("quit requested");
                        return;
                    }
                    LineCommand::Intents(intents) => {
                        if !send_all(handle, intents).await {
                            return;
                        }
                    }
                },
                Ok(None) => {
                    debug!("stdin closed");
                    return;
                }
                Err(err) => {
                    error!(error = %err, "failed to read stdin");
                    return;
                }
            },
            snapshot = snapshots.recv() => match snapshot {
                Ok(snapshot) => {
                    let frame = render::render(&snapshot);
                    if frame != last_frame {
                        println!("{frame}");
                        last_frame = frame;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "snapshot subscriber lagged");
                }
                Err(RecvError::Closed) => return,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                return;
            }
        }
    }
}

async fn send_all(handle: &RuntimeHandle, intents: impl IntoIterator<Item = Intent>) -> bool {
    for intent in intents {
        if let Err(err) = handle.send(intent).await {
            error!(error = %err, "engine stopped accepting input");
            return false;
        }
    }
    true
}
