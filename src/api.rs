//! Token-gated Spotify Web API client.
//!
//! All operations return a typed `ApiError` instead of throwing; failures
//! never escape the operation boundary. The access token lives behind a
//! shared `RwLock` so a refresh can land while a poll is in flight.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};

use crate::types::{PlaybackAction, PlaybackUpdate, Track};

const API_BASE: &str = "https://api.spotify.com/v1";

/// Delay between a successful playback command and the follow-up read that
/// picks up the new player state.
const COMMAND_REFRESH_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not authenticated")]
    NotAuthenticated,
    #[error("Authentication expired")]
    AuthExpired,
    #[error("Insufficient permissions")]
    Forbidden,
    #[error("Rate limit exceeded")]
    RateLimited,
    #[error("HTTP {0}")]
    Http(u16),
    #[error("{0}")]
    Transport(String),
    #[error("{0}")]
    Decode(String),
    #[error("Unknown playback action")]
    UnknownAction,
}

#[derive(Debug, Deserialize)]
struct PlayingResponse {
    #[serde(default)]
    is_playing: bool,
    item: Option<PlayingItem>,
}

#[derive(Debug, Deserialize)]
struct PlayingItem {
    name: String,
    #[serde(default)]
    artists: Vec<ItemArtist>,
    #[serde(default)]
    album: ItemAlbum,
}

#[derive(Debug, Deserialize)]
struct ItemArtist {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ItemAlbum {
    #[serde(default)]
    images: Vec<AlbumImage>,
}

#[derive(Debug, Deserialize)]
struct AlbumImage {
    url: String,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    access_token: Arc<RwLock<String>>,
    updates: mpsc::UnboundedSender<PlaybackUpdate>,
}

impl ApiClient {
    pub fn new(updates: mpsc::UnboundedSender<PlaybackUpdate>) -> Self {
        Self {
            http: reqwest::Client::new(),
            access_token: Arc::new(RwLock::new(String::new())),
            updates,
        }
    }

    /// Replace the token used by all subsequent requests. A request already
    /// in flight keeps the token it started with.
    pub async fn set_access_token(&self, token: &str) {
        *self.access_token.write().await = token.to_string();
        tracing::info!("Access token set");
    }

    async fn bearer(&self) -> Result<String, ApiError> {
        let token = self.access_token.read().await.clone();
        if token.is_empty() {
            return Err(ApiError::NotAuthenticated);
        }
        Ok(token)
    }

    /// Read the current playback state. A 204 from the API means nothing is
    /// playing and yields the placeholder track.
    pub async fn get_current_track(&self) -> Result<Track, ApiError> {
        let token = self.bearer().await?;

        let response = self
            .http
            .get(format!("{API_BASE}/me/player/currently-playing"))
            .bearer_auth(token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let track = classify_track_response(status, &body)?;
        tracing::debug!(name = %track.name, artist = %track.artist, "Retrieved track");
        Ok(track)
    }

    /// Issue a playback command. On success a single follow-up read is
    /// scheduled 500ms later; its outcome flows into the update channel.
    pub async fn control_playback(&self, action: PlaybackAction) -> Result<(), ApiError> {
        let token = self.bearer().await?;

        let Some((method, endpoint)) = action_route(action) else {
            tracing::error!(?action, "Unknown playback action");
            return Err(ApiError::UnknownAction);
        };
        tracing::info!(?action, endpoint, "Sending playback command");

        let mut request = self
            .http
            .request(method.clone(), format!("{API_BASE}{endpoint}"))
            .bearer_auth(token);
        if method == Method::PUT {
            request = request.json(&serde_json::json!({}));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        if !command_succeeded(status) {
            let error_body = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), body = %error_body, "Playback command failed");
            return Err(ApiError::Http(status.as_u16()));
        }

        self.schedule_track_refresh();
        Ok(())
    }

    /// Untracked by design; mirrors the fire-and-forget refresh after a
    /// successful command.
    fn schedule_track_refresh(&self) {
        let client = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(COMMAND_REFRESH_DELAY).await;
            let update = match client.get_current_track().await {
                Ok(track) => PlaybackUpdate::Track(track),
                Err(e) => PlaybackUpdate::Error(e.to_string()),
            };
            let _ = client.updates.send(update);
        });
    }

    pub async fn set_volume(&self, volume_percent: u8) -> Result<(), ApiError> {
        self.put_with_query("/me/player/volume", "volume_percent", volume_percent as u64)
            .await?;
        tracing::info!(volume_percent, "Volume set");
        Ok(())
    }

    pub async fn seek_to_position(&self, position_ms: u32) -> Result<(), ApiError> {
        self.put_with_query("/me/player/seek", "position_ms", position_ms as u64)
            .await?;
        tracing::info!(position_ms, "Seeked");
        Ok(())
    }

    async fn put_with_query(&self, endpoint: &str, param: &str, value: u64) -> Result<(), ApiError> {
        let token = self.bearer().await?;

        let response = self
            .http
            .put(format!("{API_BASE}{endpoint}?{param}={value}"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::OK || status == StatusCode::NO_CONTENT {
            Ok(())
        } else {
            tracing::error!(status = status.as_u16(), endpoint, "Player command failed");
            Err(ApiError::Http(status.as_u16()))
        }
    }
}

/// Method and endpoint for each playback action. Toggle has no route and
/// fails as an unknown action; whether it should resolve to play or pause
/// based on the current state is still undecided.
fn action_route(action: PlaybackAction) -> Option<(Method, &'static str)> {
    match action {
        PlaybackAction::Play => Some((Method::PUT, "/me/player/play")),
        PlaybackAction::Pause => Some((Method::PUT, "/me/player/pause")),
        PlaybackAction::Next => Some((Method::POST, "/me/player/next")),
        PlaybackAction::Previous => Some((Method::POST, "/me/player/previous")),
        PlaybackAction::Toggle => None,
    }
}

fn command_succeeded(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::OK | StatusCode::NO_CONTENT | StatusCode::ACCEPTED
    )
}

fn classify_track_response(status: StatusCode, body: &str) -> Result<Track, ApiError> {
    match status {
        StatusCode::OK => parse_track(body),
        StatusCode::NO_CONTENT => Ok(Track::not_playing()),
        StatusCode::UNAUTHORIZED => Err(ApiError::AuthExpired),
        StatusCode::FORBIDDEN => Err(ApiError::Forbidden),
        StatusCode::TOO_MANY_REQUESTS => Err(ApiError::RateLimited),
        other => Err(ApiError::Http(other.as_u16())),
    }
}

fn parse_track(body: &str) -> Result<Track, ApiError> {
    let response: PlayingResponse =
        serde_json::from_str(body).map_err(|e| ApiError::Decode(e.to_string()))?;
    let item = response
        .item
        .ok_or_else(|| ApiError::Decode("playback response has no item".to_string()))?;

    let artist = item
        .artists
        .iter()
        .map(|a| a.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let image_url = item
        .album
        .images
        .first()
        .map(|image| image.url.clone())
        .unwrap_or_default();

    Ok(Track {
        name: item.name,
        artist,
        image_url,
        is_playing: response.is_playing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playing_body(artists: &[&str]) -> String {
        let artists: Vec<serde_json::Value> = artists
            .iter()
            .map(|name| serde_json::json!({ "name": name }))
            .collect();
        serde_json::json!({
            "is_playing": true,
            "item": {
                "name": "Song",
                "artists": artists,
                "album": {
                    "images": [
                        { "url": "https://img/large.jpg" },
                        { "url": "https://img/small.jpg" }
                    ]
                }
            }
        })
        .to_string()
    }

    #[test]
    fn ok_response_joins_artists_in_order() {
        let track = classify_track_response(StatusCode::OK, &playing_body(&["A", "B", "C"])).unwrap();
        assert_eq!(track.name, "Song");
        assert_eq!(track.artist, "A, B, C");
        assert_eq!(track.image_url, "https://img/large.jpg");
        assert!(track.is_playing);
    }

    #[test]
    fn no_content_yields_not_playing_placeholder() {
        let track = classify_track_response(StatusCode::NO_CONTENT, "").unwrap();
        assert_eq!(track, Track::not_playing());
    }

    #[test]
    fn error_statuses_map_to_messages() {
        let unauthorized = classify_track_response(StatusCode::UNAUTHORIZED, "").unwrap_err();
        assert_eq!(unauthorized.to_string(), "Authentication expired");

        let forbidden = classify_track_response(StatusCode::FORBIDDEN, "").unwrap_err();
        assert_eq!(forbidden.to_string(), "Insufficient permissions");

        let limited = classify_track_response(StatusCode::TOO_MANY_REQUESTS, "").unwrap_err();
        assert_eq!(limited.to_string(), "Rate limit exceeded");

        let teapot = classify_track_response(StatusCode::IM_A_TEAPOT, "").unwrap_err();
        assert_eq!(teapot.to_string(), "HTTP 418");
    }

    #[test]
    fn malformed_body_is_a_decode_error() {
        assert!(matches!(
            classify_track_response(StatusCode::OK, "{not json"),
            Err(ApiError::Decode(_))
        ));
        assert!(matches!(
            classify_track_response(StatusCode::OK, r#"{"is_playing":true,"item":null}"#),
            Err(ApiError::Decode(_))
        ));
    }

    #[test]
    fn missing_album_image_leaves_url_empty() {
        let body = serde_json::json!({
            "is_playing": false,
            "item": { "name": "Song", "artists": [{ "name": "A" }], "album": { "images": [] } }
        })
        .to_string();
        let track = classify_track_response(StatusCode::OK, &body).unwrap();
        assert_eq!(track.image_url, "");
        assert!(!track.is_playing);
    }

    #[test]
    fn action_routes_match_the_player_endpoints() {
        assert_eq!(
            action_route(PlaybackAction::Play),
            Some((Method::PUT, "/me/player/play"))
        );
        assert_eq!(
            action_route(PlaybackAction::Pause),
            Some((Method::PUT, "/me/player/pause"))
        );
        assert_eq!(
            action_route(PlaybackAction::Next),
            Some((Method::POST, "/me/player/next"))
        );
        assert_eq!(
            action_route(PlaybackAction::Previous),
            Some((Method::POST, "/me/player/previous"))
        );
        assert_eq!(action_route(PlaybackAction::Toggle), None);
    }

    #[test]
    fn command_success_statuses() {
        assert!(command_succeeded(StatusCode::OK));
        assert!(command_succeeded(StatusCode::ACCEPTED));
        assert!(command_succeeded(StatusCode::NO_CONTENT));
        assert!(!command_succeeded(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn operations_fail_fast_without_a_token() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = ApiClient::new(tx);

        assert!(matches!(
            client.get_current_track().await,
            Err(ApiError::NotAuthenticated)
        ));
        assert!(matches!(
            client.control_playback(PlaybackAction::Play).await,
            Err(ApiError::NotAuthenticated)
        ));
        assert!(matches!(
            client.set_volume(50).await,
            Err(ApiError::NotAuthenticated)
        ));
        assert!(matches!(
            client.seek_to_position(1000).await,
            Err(ApiError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn toggle_is_rejected_before_any_network_call() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = ApiClient::new(tx);
        client.set_access_token("token").await;

        assert!(matches!(
            client.control_playback(PlaybackAction::Toggle).await,
            Err(ApiError::UnknownAction)
        ));
    }

    #[tokio::test]
    async fn deferred_refresh_sends_exactly_one_update() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        // Token-less, so the follow-up read resolves without the network.
        let client = ApiClient::new(tx);

        let started = std::time::Instant::now();
        client.schedule_track_refresh();

        let update = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("deferred refresh should fire")
            .expect("channel should stay open");
        assert!(started.elapsed() >= COMMAND_REFRESH_DELAY);
        match update {
            PlaybackUpdate::Error(message) => assert_eq!(message, "Not authenticated"),
            other => panic!("expected an error update, got {:?}", other),
        }

        // Exactly one follow-up read per command
        assert!(
            tokio::time::timeout(Duration::from_millis(700), rx.recv())
                .await
                .is_err(),
            "a second update would mean more than one scheduled refresh"
        );
    }
}
