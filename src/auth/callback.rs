//! Local HTTP listener that captures the OAuth redirect.
//!
//! The authorization server redirects the user's browser to
//! `http://127.0.0.1:8888/callback?code=...`; this module accepts that one
//! request, hands the code to the orchestrator through a oneshot channel and
//! answers with a static success page. A second delivery within the same
//! attempt leaves the captured code untouched.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const SUCCESS_PAGE: &str = r#"<!doctype html>
<html>
<head><title>Success</title></head>
<body><h1>Authentication Successful!</h1>
<p>You can close this window and return to the application.</p></body>
</html>
"#;

/// One-shot capture slot for the current authentication attempt.
#[derive(Default)]
struct AttemptState {
    code: Option<String>,
    received: bool,
    tx: Option<oneshot::Sender<String>>,
}

pub struct CallbackServer {
    addr: SocketAddr,
    state: Arc<Mutex<AttemptState>>,
    accept_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl CallbackServer {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            state: Arc::new(Mutex::new(AttemptState::default())),
            accept_task: None,
            local_addr: None,
        }
    }

    /// Clear any previously captured code and hand back a fresh wait handle.
    /// Must be called before each attempt.
    pub fn reset(&mut self) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock().unwrap();
        state.code = None;
        state.received = false;
        state.tx = Some(tx);
        rx
    }

    /// Bind the listener and start accepting redirect requests.
    pub async fn open(&mut self) -> Result<()> {
        let listener = TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("could not bind callback listener on {}", self.addr))?;
        self.local_addr = listener.local_addr().ok();
        tracing::info!(addr = %self.addr, "Callback server listening");

        let state = self.state.clone();
        self.accept_task = Some(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        tracing::debug!(%peer, "Callback connection accepted");
                        if let Err(e) = handle_connection(stream, &state).await {
                            tracing::warn!(error = %e, "Callback request failed");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Callback accept failed");
                        break;
                    }
                }
            }
        }));
        Ok(())
    }

    /// Stop listening. Safe to call repeatedly, or without a prior `open()`.
    pub async fn close(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
            let _ = task.await;
            tracing::info!("Callback server stopped");
        }
        self.local_addr = None;
    }

    /// Address the listener actually bound to, while open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    #[cfg(test)]
    pub(crate) fn captured_code(&self) -> Option<String> {
        self.state.lock().unwrap().code.clone()
    }
}

async fn handle_connection(mut stream: TcpStream, state: &Mutex<AttemptState>) -> Result<()> {
    let mut buf = [0u8; 4096];
    let n = stream.read(&mut buf).await?;
    let request = String::from_utf8_lossy(&buf[..n]);

    let Some(code) = extract_code(&request) else {
        write_response(&mut stream, "404 Not Found", "Not Found").await?;
        return Ok(());
    };

    let captured_tx = {
        let mut state = state.lock().unwrap();
        if state.received {
            // One code per attempt; later deliveries are dropped.
            tracing::warn!("Authorization code already received, ignoring extra callback");
            None
        } else {
            tracing::info!("Got authorization code");
            state.received = true;
            state.code = Some(code.clone());
            state.tx.take()
        }
    };

    // Answer the browser before handing the code over; the orchestrator
    // closes the listener as soon as the code arrives, which would cut a
    // response still in flight.
    let write_result = write_response(&mut stream, "200 OK", SUCCESS_PAGE).await;
    if let Some(tx) = captured_tx {
        let _ = tx.send(code);
    }
    write_result
}

/// Pull the `code` query parameter out of the request line of a redirect
/// such as `GET /callback?code=abc&state=x HTTP/1.1`.
fn extract_code(request: &str) -> Option<String> {
    let first_line = request.lines().next()?;
    let path = first_line.strip_prefix("GET ")?.split(' ').next()?;
    let query = path.split_once('?')?.1;

    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            if key == "code" && !value.is_empty() {
                return urlencoding::decode(value).ok().map(|v| v.into_owned());
            }
        }
    }
    None
}

async fn write_response(stream: &mut TcpStream, status: &str, body: &str) -> Result<()> {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}
