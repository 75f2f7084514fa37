//! IPC Client for communicating with the sense-of-time daemon.
//!
//! This module provides:
//! - Unix Domain Socket client
//! - Request/response handling
//! - Connection retry logic
//! - Timeout handling

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::timeout;

use crate::daemon::config::default_socket_path;
use crate::types::{IpcRequest, IpcResponse, SurfaceId};

// ============================================================================
// Constants
// ============================================================================

/// Connection timeout in seconds
const CONNECTION_TIMEOUT_SECS: u64 = 5;

/// Read/write timeout in seconds
const IO_TIMEOUT_SECS: u64 = 5;

/// Maximum retry attempts
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds (base delay, multiplied by attempt number)
const RETRY_DELAY_MS: u64 = 500;

// ============================================================================
// IpcClient
// ============================================================================

/// IPC client for daemon communication.
#[derive(Debug, Clone)]
pub struct IpcClient {
    /// Socket path
    socket_path: PathBuf,
    /// Connection timeout
    timeout: Duration,
    /// Base retry delay
    retry_delay: Duration,
}

impl IpcClient {
    /// Creates a new IPC client with default socket path.
    pub fn new() -> Result<Self> {
        Ok(Self::with_socket_path(default_socket_path()?))
    }

    /// Creates a new IPC client with a custom socket path.
    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: Duration::from_secs(CONNECTION_TIMEOUT_SECS),
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
        }
    }

    /// Uses `socket_path` if given, the default otherwise.
    pub fn from_option(socket_path: Option<PathBuf>) -> Result<Self> {
        match socket_path {
            Some(path) => Ok(Self::with_socket_path(path)),
            None => Self::new(),
        }
    }

    /// Overrides the base retry delay.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Queries the timer state.
    pub async fn get_state(&self) -> Result<IpcResponse> {
        self.send_request_with_retry(&IpcRequest::GetTimerState).await
    }

    /// Starts or resumes the countdown.
    pub async fn start(&self) -> Result<IpcResponse> {
        self.send_request_with_retry(&IpcRequest::StartTimer).await
    }

    /// Pauses the countdown.
    pub async fn stop(&self) -> Result<IpcResponse> {
        self.send_request_with_retry(&IpcRequest::StopTimer).await
    }

    /// Resets the countdown.
    pub async fn reset(&self) -> Result<IpcResponse> {
        self.send_request_with_retry(&IpcRequest::ResetTimer).await
    }

    /// Sets the countdown duration in seconds.
    pub async fn update_duration(&self, total_seconds: u32) -> Result<IpcResponse> {
        let request = IpcRequest::UpdateTimerState {
            time_left: Some(total_seconds),
            total_time: Some(total_seconds),
        };
        self.send_request_with_retry(&request).await
    }

    /// Focuses or creates the timer window.
    pub async fn open_window(&self) -> Result<IpcResponse> {
        self.send_request_with_retry(&IpcRequest::OpenTimerWindow)
            .await
    }

    /// Signals that a surface is closing.
    pub async fn popup_closed(&self, surface_id: Option<SurfaceId>) -> Result<IpcResponse> {
        self.send_request_with_retry(&IpcRequest::PopupClosed { surface_id })
            .await
    }

    /// Checks that the daemon answers.
    pub async fn ping(&self) -> Result<IpcResponse> {
        self.send_request(&IpcRequest::Ping).await
    }

    /// Sends a request to the daemon with retry logic.
    async fn send_request_with_retry(&self, request: &IpcRequest) -> Result<IpcResponse> {
        let mut last_error = None;

        for attempt in 1..=MAX_RETRIES {
            match self.send_request(request).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    tracing::warn!(
                        "request failed (attempt {}/{}): {:#}",
                        attempt,
                        MAX_RETRIES,
                        e
                    );
                    last_error = Some(e);

                    if attempt < MAX_RETRIES {
                        tokio::time::sleep(self.retry_delay * attempt).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("request was not sent")))
    }

    /// Opens a connection to the daemon.
    pub(crate) async fn connect(&self) -> Result<UnixStream> {
        timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .context("Connection timed out")?
            .with_context(|| {
                format!(
                    "Cannot connect to the daemon at {}. Start it with 'sense-of-time daemon'",
                    self.socket_path.display()
                )
            })
    }

    /// Sends a single request to the daemon.
    async fn send_request(&self, request: &IpcRequest) -> Result<IpcResponse> {
        let stream = self.connect().await?;
        let (reader, mut writer) = stream.into_split();

        let mut request_json =
            serde_json::to_string(request).context("Failed to serialize request")?;
        request_json.push('\n');

        timeout(
            Duration::from_secs(IO_TIMEOUT_SECS),
            writer.write_all(request_json.as_bytes()),
        )
        .await
        .context("Write timed out")?
        .context("Failed to send request")?;

        // Shutdown write side to signal end of request
        writer.shutdown().await.context("Failed to shut down write side")?;

        let line = timeout(
            Duration::from_secs(IO_TIMEOUT_SECS),
            BufReader::new(reader).lines().next_line(),
        )
        .await
        .context("Read timed out")?
        .context("Failed to receive response")?
        .context("The daemon closed the connection without answering")?;

        let response: IpcResponse =
            serde_json::from_str(&line).context("Failed to parse response")?;

        // Check for error response
        if !response.is_success() {
            anyhow::bail!("{}", response.message);
        }

        Ok(response)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    fn create_temp_socket_path() -> PathBuf {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sock");
        std::mem::forget(dir);
        path
    }

    /// Serves `count` connections, answering each with `response`.
    fn spawn_fake_daemon(path: &Path, response: &'static str, count: usize) -> tokio::task::JoinHandle<Vec<String>> {
        let listener = UnixListener::bind(path).unwrap();
        tokio::spawn(async move {
            let mut requests = Vec::new();
            for _ in 0..count {
                let (stream, _) = listener.accept().await.unwrap();
                let (reader, mut writer) = stream.into_split();
                let line = BufReader::new(reader).lines().next_line().await.unwrap().unwrap();
                requests.push(line);
                writer.write_all(response.as_bytes()).await.unwrap();
                writer.write_all(b"\n").await.unwrap();
            }
            requests
        })
    }

    mod ipc_client_tests {
        use super::*;

        #[test]
        fn test_with_socket_path() {
            let client = IpcClient::with_socket_path(PathBuf::from("/tmp/x.sock"));
            assert_eq!(client.socket_path(), Path::new("/tmp/x.sock"));
        }

        #[test]
        fn test_from_option_default() {
            let client = IpcClient::from_option(None).unwrap();
            assert!(client.socket_path().ends_with("sense-of-time.sock"));
        }

        #[tokio::test]
        async fn test_request_is_one_json_line() {
            let path = create_temp_socket_path();
            let daemon = spawn_fake_daemon(&path, r#"{"status":"success","message":""}"#, 1);

            let client = IpcClient::with_socket_path(path);
            let response = client.update_duration(300).await.unwrap();
            assert!(response.is_success());

            let requests = daemon.await.unwrap();
            let value: serde_json::Value = serde_json::from_str(&requests[0]).unwrap();
            assert_eq!(value["action"], "updateTimerState");
            assert_eq!(value["timeLeft"], 300);
            assert_eq!(value["totalTime"], 300);
        }

        #[tokio::test]
        async fn test_error_response_becomes_error() {
            let path = create_temp_socket_path();
            let _daemon = spawn_fake_daemon(&path, r#"{"status":"error","message":"boom"}"#, 1);

            let client = IpcClient::with_socket_path(path);
            let err = client.ping().await.unwrap_err();
            assert!(err.to_string().contains("boom"));
        }

        #[tokio::test]
        async fn test_no_daemon_fails_after_retries() {
            let client = IpcClient::with_socket_path(create_temp_socket_path())
                .with_retry_delay(Duration::from_millis(1));

            let err = client.get_state().await.unwrap_err();
            assert!(format!("{:#}", err).contains("Cannot connect to the daemon"));
        }
    }
}
