mod api;
mod auth;
mod config;
mod logging;
mod poller;
mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use api::ApiClient;
use auth::AuthOrchestrator;
use config::Config;
use poller::PollingLoop;
use types::{PlaybackAction, PlaybackUpdate};

const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Console command from the stand-in display layer.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Playback(PlaybackAction),
    Volume(u8),
    Seek(u32),
    Quit,
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = logging::init_logging() {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    tracing::info!("=== Spotify Overlay Starting ===");

    let config_dir = config::config_dir()?;
    let config = Config::load(&config_dir.join("config.ini"))?;
    let tokens_path = config_dir.join("tokens.json");

    let mut orchestrator = AuthOrchestrator::new(&config);
    if let Some(stored) = config::load_tokens(&tokens_path) {
        orchestrator.set_tokens(stored);
    }

    let persist_path = tokens_path.clone();
    orchestrator.on_tokens(move |tokens| {
        if let Err(e) = config::save_tokens(&persist_path, tokens) {
            tracing::warn!(error = %e, "Could not persist tokens");
        }
    });

    // A valid stored pair still gets a refresh so the session starts with a
    // fresh access token; a failed refresh falls back to the browser flow.
    let authenticated = if orchestrator.is_authenticated() {
        tracing::info!("Found stored tokens, refreshing");
        let refresh_token = orchestrator.tokens().refresh_token.clone();
        orchestrator.refresh_tokens(&refresh_token).await || orchestrator.authenticate().await
    } else {
        tracing::info!("Not authenticated, starting browser flow");
        orchestrator.authenticate().await
    };

    if !authenticated {
        bail!("authentication failed, check your credentials and try again");
    }
    tracing::info!("Authentication successful");

    let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();
    let client = ApiClient::new(updates_tx.clone());
    client
        .set_access_token(&orchestrator.tokens().access_token)
        .await;

    let poller = Arc::new(PollingLoop::new(client.clone(), updates_tx));
    poller.start_polling(POLL_INTERVAL).await;

    println!("Polling playback state. Commands: play, pause, next, prev, toggle, vol <0-100>, seek <ms>, quit");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupt received");
                break;
            }
            update = updates_rx.recv() => match update {
                Some(PlaybackUpdate::Track(track)) => {
                    let state = if track.is_playing { "playing" } else { "paused" };
                    println!("[{state}] {} - {}", track.name, track.artist);
                }
                Some(PlaybackUpdate::Error(message)) => {
                    tracing::warn!(%message, "Playback read failed");
                    println!("error: {message}");
                }
                None => break,
            },
            line = stdin.next_line() => {
                let Ok(Some(line)) = line else { break };
                match parse_command(&line) {
                    Some(Command::Quit) => break,
                    Some(command) => dispatch(&client, command),
                    None => {
                        if !line.trim().is_empty() {
                            println!("unknown command: {}", line.trim());
                        }
                    }
                }
            }
        }
    }

    if poller.is_polling() {
        poller.stop_polling().await;
    }
    tracing::info!("Spotify Overlay shutting down");
    Ok(())
}

fn parse_command(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    let command = match parts.next()? {
        "play" => Command::Playback(PlaybackAction::Play),
        "pause" => Command::Playback(PlaybackAction::Pause),
        "next" => Command::Playback(PlaybackAction::Next),
        "prev" => Command::Playback(PlaybackAction::Previous),
        "toggle" => Command::Playback(PlaybackAction::Toggle),
        "vol" => Command::Volume(parts.next()?.parse().ok().filter(|v| *v <= 100)?),
        "seek" => Command::Seek(parts.next()?.parse().ok()?),
        "quit" | "exit" => Command::Quit,
        _ => return None,
    };
    Some(command)
}

/// Commands run as independent fire-and-forget requests, matching the
/// overlay's button handling; results only surface through the log.
fn dispatch(client: &ApiClient, command: Command) {
    let client = client.clone();
    tokio::spawn(async move {
        let result = match command {
            Command::Playback(action) => client.control_playback(action).await,
            Command::Volume(percent) => client.set_volume(percent).await,
            Command::Seek(position_ms) => client.seek_to_position(position_ms).await,
            Command::Quit => return,
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "Command failed");
            println!("command failed: {e}");
        }
    });
}
