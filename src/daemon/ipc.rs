//! IPC Server for the countdown daemon.
//!
//! This module provides Unix Domain Socket IPC functionality:
//! - Server that listens on a Unix socket
//! - Newline-delimited JSON framing for requests, responses and pushes
//! - Request handling through the [`EngineHandle`]
//! - Push streams for surfaces that announced themselves with `popupOpened`

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::types::{
    IpcRequest, IpcResponse, PushEvent, ResponseData, SurfaceAck, SurfaceId, WindowAction,
};

use super::service::{Command, CommandReply, EngineHandle};
use super::surfaces::{SurfaceHandle, SurfaceMessage};

// ============================================================================
// Constants
// ============================================================================

/// Maximum request line size in bytes (4KB)
const MAX_REQUEST_SIZE: usize = 4096;

/// Read timeout in seconds
const READ_TIMEOUT_SECS: u64 = 5;

// ============================================================================
// IpcError
// ============================================================================

/// IPC-specific error types.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// Read error
    #[error("Failed to read request: {0}")]
    ReadError(String),

    /// Write error
    #[error("Failed to write message: {0}")]
    WriteError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The peer closed the connection
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Request too large
    #[error("Request too large (max {MAX_REQUEST_SIZE} bytes)")]
    RequestTooLarge,
}

// ============================================================================
// IpcServer
// ============================================================================

/// Unix Domain Socket IPC server.
pub struct IpcServer {
    /// Unix socket listener
    listener: UnixListener,
    /// Socket path (for cleanup)
    socket_path: PathBuf,
}

impl IpcServer {
    /// Creates a new IPC server bound to the specified socket path.
    ///
    /// If the socket file already exists, it will be removed before binding.
    /// The socket is made accessible to the owner only.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound.
    pub fn new(socket_path: &Path) -> Result<Self> {
        if socket_path.exists() {
            std::fs::remove_file(socket_path)
                .with_context(|| format!("Failed to remove existing socket: {:?}", socket_path))?;
        }

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create socket directory: {:?}", parent))?;
        }

        let listener = UnixListener::bind(socket_path)
            .with_context(|| format!("Failed to bind Unix socket: {:?}", socket_path))?;

        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("Failed to set socket permissions: {:?}", socket_path))?;
        }

        Ok(Self {
            listener,
            socket_path: socket_path.to_path_buf(),
        })
    }

    /// Accepts an incoming client connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be accepted.
    pub async fn accept(&self) -> Result<IpcConnection> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .context("Failed to accept connection")?;
        Ok(IpcConnection::new(stream))
    }

    /// Accepts connections forever, serving each on its own task.
    pub async fn serve(&self, handler: RequestHandler) {
        loop {
            match self.accept().await {
                Ok(connection) => {
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handler.serve_connection(connection).await {
                            debug!("connection ended with error: {:#}", e);
                        }
                    });
                }
                Err(e) => warn!("{:#}", e),
            }
        }
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

// ============================================================================
// IpcConnection
// ============================================================================

/// A line-framed connection: one JSON document per line.
///
/// Lines longer than `MAX_REQUEST_SIZE` are rejected before they are
/// buffered in full.
pub struct IpcConnection {
    reader: BufReader<OwnedReadHalf>,
    buf: Vec<u8>,
    writer: OwnedWriteHalf,
}

impl IpcConnection {
    /// Wraps a connected stream.
    pub fn new(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            buf: Vec::new(),
            writer,
        }
    }

    /// Receives and deserializes an IPC request.
    ///
    /// Applies a read timeout to prevent blocking indefinitely.
    ///
    /// # Errors
    ///
    /// Returns an error on timeout, EOF, oversized or malformed input.
    pub async fn receive_request(&mut self) -> Result<IpcRequest, IpcError> {
        let line = match timeout(Duration::from_secs(READ_TIMEOUT_SECS), self.next_line()).await {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => return Err(IpcError::ConnectionClosed),
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(IpcError::Timeout),
        };

        serde_json::from_str(&line).map_err(|e| IpcError::SerializationError(e.to_string()))
    }

    /// Serializes `message` and writes it as one line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<(), IpcError> {
        let mut json =
            serde_json::to_vec(message).map_err(|e| IpcError::SerializationError(e.to_string()))?;
        json.push(b'\n');

        self.writer
            .write_all(&json)
            .await
            .map_err(|e| IpcError::WriteError(e.to_string()))?;
        self.writer
            .flush()
            .await
            .map_err(|e| IpcError::WriteError(e.to_string()))
    }

    /// Reads the next line without a timeout. Cancel-safe: a partially
    /// read line is kept and completed by the next call.
    ///
    /// # Errors
    ///
    /// Returns [`IpcError::RequestTooLarge`] once a line exceeds
    /// `MAX_REQUEST_SIZE` bytes, or a read error.
    pub async fn next_line(&mut self) -> Result<Option<String>, IpcError> {
        // Room for one byte past the limit so an oversized line is detectable
        let limit = (MAX_REQUEST_SIZE + 1).saturating_sub(self.buf.len()) as u64;
        let read = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut self.buf)
            .await
            .map_err(|e| IpcError::ReadError(e.to_string()))?;

        let mut line = std::mem::take(&mut self.buf);
        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        } else if line.len() > MAX_REQUEST_SIZE {
            return Err(IpcError::RequestTooLarge);
        } else if read == 0 && line.is_empty() {
            return Ok(None);
        }

        String::from_utf8(line)
            .map(Some)
            .map_err(|e| IpcError::ReadError(e.to_string()))
    }
}

// ============================================================================
// RequestHandler
// ============================================================================

/// Handles IPC requests by dispatching to the engine service.
#[derive(Debug, Clone)]
pub struct RequestHandler {
    engine: EngineHandle,
}

impl RequestHandler {
    /// Creates a new request handler for the given engine.
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }

    /// Serves one connection.
    ///
    /// A `popupOpened` request turns the connection into that surface's
    /// push stream; every other request gets one response.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be read or answered.
    pub async fn serve_connection(&self, mut connection: IpcConnection) -> Result<()> {
        let request = match connection.receive_request().await {
            Ok(request) => request,
            Err(e @ IpcError::SerializationError(_)) | Err(e @ IpcError::RequestTooLarge) => {
                connection.send(&IpcResponse::error(e.to_string())).await?;
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };
        debug!(action = request.action(), "request received");

        match request {
            IpcRequest::PopupOpened { surface_id } => {
                let (response, stream) = self.attach(surface_id).await;
                connection.send(&response).await?;
                if let Some((surface_id, rx)) = stream {
                    run_push_stream(connection, rx, self.engine.clone(), surface_id).await;
                }
            }
            request => {
                let response = self.handle(request).await;
                connection.send(&response).await?;
            }
        }
        Ok(())
    }

    /// Handles an IPC request and returns the appropriate response.
    ///
    /// `popupOpened` received here attaches the surface without a push
    /// stream; the next heartbeat will find it unreachable.
    pub async fn handle(&self, request: IpcRequest) -> IpcResponse {
        match request {
            IpcRequest::GetTimerState => self.handle_get_state().await,
            IpcRequest::StartTimer => self.handle_start().await,
            IpcRequest::StopTimer => self.handle_stop().await,
            IpcRequest::ResetTimer => self.handle_reset().await,
            IpcRequest::UpdateTimerState {
                time_left,
                total_time,
            } => self.handle_update(time_left, total_time).await,
            IpcRequest::PopupOpened { surface_id } => self.attach(surface_id).await.0,
            IpcRequest::PopupClosed { surface_id } => self.handle_popup_closed(surface_id).await,
            IpcRequest::OpenTimerWindow => self.handle_open_window().await,
            IpcRequest::Ping => IpcResponse::success("", Some(ResponseData::received())),
        }
    }

    /// Subscribes a surface and returns its push stream receiver.
    pub async fn attach(
        &self,
        surface_id: Option<SurfaceId>,
    ) -> (
        IpcResponse,
        Option<(SurfaceId, mpsc::UnboundedReceiver<SurfaceMessage>)>,
    ) {
        let surface_id = surface_id.unwrap_or_else(SurfaceId::generate);
        let (handle, rx) = SurfaceHandle::new(surface_id.clone());

        match self.engine.execute(Command::Attach(handle)).await {
            Ok(reply) => {
                let mut data = ResponseData::from_timer_state(&reply.state);
                data.surface_id = Some(surface_id.clone());
                (
                    IpcResponse::success("Surface attached", Some(data)),
                    Some((surface_id, rx)),
                )
            }
            Err(e) => (IpcResponse::error(e.to_string()), None),
        }
    }

    async fn handle_get_state(&self) -> IpcResponse {
        self.respond(Command::GetState, |_| "").await
    }

    async fn handle_start(&self) -> IpcResponse {
        self.respond(Command::Start, |reply| {
            if reply.applied {
                "Timer started"
            } else if !reply.state.surface_attached {
                "No timer window is attached; start ignored"
            } else {
                "Timer is already running"
            }
        })
        .await
    }

    async fn handle_stop(&self) -> IpcResponse {
        self.respond(Command::Stop, |reply| {
            if reply.applied {
                "Timer stopped"
            } else {
                "Timer is not running"
            }
        })
        .await
    }

    async fn handle_reset(&self) -> IpcResponse {
        self.respond(Command::Reset, |_| "Timer reset").await
    }

    async fn handle_update(&self, time_left: Option<u32>, total_time: Option<u32>) -> IpcResponse {
        let command = Command::UpdateConfig {
            time_left,
            total_time,
        };
        self.respond(command, |reply| {
            if reply.applied {
                "Timer updated"
            } else if reply.state.running {
                "Timer is running; update ignored"
            } else {
                "No duration given; update ignored"
            }
        })
        .await
    }

    async fn handle_popup_closed(&self, surface_id: Option<SurfaceId>) -> IpcResponse {
        self.respond(Command::Detach(surface_id), |_| "Surface detached")
            .await
    }

    async fn handle_open_window(&self) -> IpcResponse {
        match self.engine.execute(Command::OpenWindow).await {
            Ok(reply) => {
                let window = reply.window.unwrap_or(WindowAction::Unavailable);
                let message = match window {
                    WindowAction::Focused => "Timer window focused",
                    WindowAction::Created => "Timer window opened",
                    WindowAction::Unavailable => "No timer window could be opened",
                };
                let mut data = ResponseData::from_timer_state(&reply.state);
                data.window = Some(window);
                IpcResponse::success(message, Some(data))
            }
            Err(e) => IpcResponse::error(e.to_string()),
        }
    }

    async fn respond(
        &self,
        command: Command,
        message: impl FnOnce(&CommandReply) -> &'static str,
    ) -> IpcResponse {
        match self.engine.execute(command).await {
            Ok(reply) => IpcResponse::success(
                message(&reply),
                Some(ResponseData::from_timer_state(&reply.state)),
            ),
            Err(e) => IpcResponse::error(e.to_string()),
        }
    }
}

// ============================================================================
// Push stream
// ============================================================================

/// Forwards pushes and pings to a surface until either side goes away,
/// then reports the closed window to the engine.
async fn run_push_stream(
    mut connection: IpcConnection,
    mut rx: mpsc::UnboundedReceiver<SurfaceMessage>,
    engine: EngineHandle,
    surface_id: SurfaceId,
) {
    let mut pending_ack: Option<oneshot::Sender<()>> = None;
    info!(surface = %surface_id, "push stream opened");

    loop {
        tokio::select! {
            message = rx.recv() => {
                let sent = match message {
                    Some(SurfaceMessage::Push(event)) => connection.send(&event).await,
                    Some(SurfaceMessage::Ping(ack)) => {
                        pending_ack = Some(ack);
                        connection.send(&PushEvent::Ping).await
                    }
                    None => break,
                };
                if let Err(e) = sent {
                    debug!(surface = %surface_id, "push failed: {}", e);
                    break;
                }
            }
            line = connection.next_line() => match line {
                Ok(Some(line)) => match serde_json::from_str::<SurfaceAck>(&line) {
                    Ok(SurfaceAck { received: true }) => {
                        if let Some(ack) = pending_ack.take() {
                            let _ = ack.send(());
                        }
                    }
                    Ok(_) => {}
                    Err(_) => debug!(surface = %surface_id, "unexpected line on push stream"),
                },
                Ok(None) => break,
                Err(e) => {
                    warn!(surface = %surface_id, "dropping push stream: {}", e);
                    break;
                }
            },
        }
    }

    drop(rx);
    info!(surface = %surface_id, "push stream closed");
    engine.window_closed(surface_id);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::Lines;
    use tokio::sync::mpsc::unbounded_channel;

    use crate::daemon::host::MockWindowHost;
    use crate::daemon::service::{EngineService, ServiceTiming};
    use crate::daemon::timer::TimerEngine;

    // ------------------------------------------------------------------------
    // Helper functions
    // ------------------------------------------------------------------------

    fn create_temp_socket_path() -> PathBuf {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sock");
        // Keep the directory so it's not deleted
        std::mem::forget(dir);
        path
    }

    fn create_handler() -> RequestHandler {
        let (tx, _rx) = unbounded_channel();
        let engine = TimerEngine::new(60, tx).with_host(MockWindowHost::new());
        let (service, handle) = EngineService::new(engine, ServiceTiming::default());
        tokio::spawn(service.run());
        RequestHandler::new(handle)
    }

    async fn write_line(stream: &mut UnixStream, line: &str) {
        stream.write_all(line.as_bytes()).await.unwrap();
        stream.write_all(b"\n").await.unwrap();
        stream.flush().await.unwrap();
    }

    // ------------------------------------------------------------------------
    // IpcServer Tests
    // ------------------------------------------------------------------------

    mod ipc_server_tests {
        use super::*;

        #[tokio::test]
        async fn test_server_creation() {
            let socket_path = create_temp_socket_path();
            let server = IpcServer::new(&socket_path);

            assert!(server.is_ok());
            assert!(socket_path.exists());
        }

        #[tokio::test]
        async fn test_server_removes_existing_socket() {
            let socket_path = create_temp_socket_path();
            std::fs::write(&socket_path, "dummy").unwrap();

            let server = IpcServer::new(&socket_path);
            assert!(server.is_ok());
        }

        #[tokio::test]
        async fn test_server_creates_parent_directory() {
            let dir = tempfile::tempdir().unwrap();
            let socket_path = dir.path().join("subdir").join("test.sock");

            let server = IpcServer::new(&socket_path);
            assert!(server.is_ok());
            assert!(socket_path.parent().unwrap().exists());
        }

        #[tokio::test]
        async fn test_socket_removed_on_drop() {
            let socket_path = create_temp_socket_path();
            let server = IpcServer::new(&socket_path).unwrap();
            assert_eq!(server.socket_path(), socket_path);

            drop(server);
            assert!(!socket_path.exists());
        }

        #[tokio::test]
        async fn test_receive_request() {
            let socket_path = create_temp_socket_path();
            let server = IpcServer::new(&socket_path).unwrap();

            let client_path = socket_path.clone();
            let client_handle = tokio::spawn(async move {
                let mut stream = UnixStream::connect(&client_path).await.unwrap();
                write_line(&mut stream, r#"{"action":"updateTimerState","timeLeft":300,"totalTime":300}"#).await;
                stream
            });

            let mut connection = server.accept().await.unwrap();
            let request = connection.receive_request().await.unwrap();

            assert_eq!(
                request,
                IpcRequest::UpdateTimerState {
                    time_left: Some(300),
                    total_time: Some(300)
                }
            );
            client_handle.await.unwrap();
        }

        #[tokio::test]
        async fn test_receive_request_invalid_json() {
            let socket_path = create_temp_socket_path();
            let server = IpcServer::new(&socket_path).unwrap();

            let client_path = socket_path.clone();
            let client_handle = tokio::spawn(async move {
                let mut stream = UnixStream::connect(&client_path).await.unwrap();
                write_line(&mut stream, "not valid json").await;
                stream
            });

            let mut connection = server.accept().await.unwrap();
            let result = connection.receive_request().await;

            assert!(matches!(result, Err(IpcError::SerializationError(_))));
            client_handle.await.unwrap();
        }

        #[tokio::test]
        async fn test_oversized_request_gets_error_reply() {
            let socket_path = create_temp_socket_path();
            let server = IpcServer::new(&socket_path).unwrap();
            let handler = create_handler();

            let client_path = socket_path.clone();
            let client_handle = tokio::spawn(async move {
                let stream = UnixStream::connect(&client_path).await.unwrap();
                let (reader, mut writer) = stream.into_split();
                let mut oversized = vec![b'x'; MAX_REQUEST_SIZE * 2];
                oversized.push(b'\n');
                // The server may hang up before the whole line is written
                let _ = writer.write_all(&oversized).await;
                let reply = BufReader::new(reader).lines().next_line().await.unwrap();
                (reply.unwrap(), writer)
            });

            let connection = server.accept().await.unwrap();
            let result = handler.serve_connection(connection).await;
            assert!(result.is_err());

            let (reply, _writer) = client_handle.await.unwrap();
            let reply: IpcResponse = serde_json::from_str(&reply).unwrap();
            assert!(!reply.is_success());
            assert!(reply.message.contains("too large"));
        }

        #[tokio::test]
        async fn test_unterminated_line_rejected_at_limit() {
            let socket_path = create_temp_socket_path();
            let server = IpcServer::new(&socket_path).unwrap();

            let client_path = socket_path.clone();
            let client_handle = tokio::spawn(async move {
                let mut stream = UnixStream::connect(&client_path).await.unwrap();
                // No newline: the read has to stop at the limit on its own
                let oversized = vec![b'x'; MAX_REQUEST_SIZE * 2];
                stream.write_all(&oversized).await.unwrap();
                stream
            });

            let mut connection = server.accept().await.unwrap();
            let result = connection.next_line().await;

            assert!(matches!(result, Err(IpcError::RequestTooLarge)));
            client_handle.await.unwrap();
        }

        #[tokio::test]
        async fn test_line_at_limit_is_accepted() {
            let socket_path = create_temp_socket_path();
            let server = IpcServer::new(&socket_path).unwrap();

            let client_path = socket_path.clone();
            let client_handle = tokio::spawn(async move {
                let mut stream = UnixStream::connect(&client_path).await.unwrap();
                write_line(&mut stream, &"y".repeat(MAX_REQUEST_SIZE)).await;
                stream
            });

            let mut connection = server.accept().await.unwrap();
            let line = connection.next_line().await.unwrap().unwrap();

            assert_eq!(line.len(), MAX_REQUEST_SIZE);
            client_handle.await.unwrap();
        }

        #[tokio::test]
        async fn test_receive_request_eof() {
            let socket_path = create_temp_socket_path();
            let server = IpcServer::new(&socket_path).unwrap();

            let client_path = socket_path.clone();
            tokio::spawn(async move {
                let _ = UnixStream::connect(&client_path).await.unwrap();
            });

            let mut connection = server.accept().await.unwrap();
            let result = connection.receive_request().await;

            assert!(matches!(result, Err(IpcError::ConnectionClosed)));
        }

        #[tokio::test]
        async fn test_send_response_is_line_framed() {
            let socket_path = create_temp_socket_path();
            let server = IpcServer::new(&socket_path).unwrap();

            let client_path = socket_path.clone();
            let client_handle = tokio::spawn(async move {
                let mut stream = UnixStream::connect(&client_path).await.unwrap();
                let mut buffer = String::new();
                stream.read_to_string(&mut buffer).await.unwrap();
                buffer
            });

            let mut connection = server.accept().await.unwrap();
            connection
                .send(&IpcResponse::success("Test message", None))
                .await
                .unwrap();
            drop(connection);

            let received = client_handle.await.unwrap();
            assert!(received.ends_with('\n'));
            let response: IpcResponse = serde_json::from_str(received.trim_end()).unwrap();
            assert_eq!(response.status, "success");
            assert_eq!(response.message, "Test message");
        }
    }

    // ------------------------------------------------------------------------
    // RequestHandler Tests
    // ------------------------------------------------------------------------

    mod request_handler_tests {
        use super::*;

        #[tokio::test]
        async fn test_get_state() {
            let handler = create_handler();

            let response = handler.handle(IpcRequest::GetTimerState).await;

            assert!(response.is_success());
            let state = response.timer_state().unwrap();
            assert_eq!(state.remaining_seconds, 60);
            assert_eq!(response.data.unwrap().phase.as_deref(), Some("idle"));
        }

        #[tokio::test]
        async fn test_start_without_surface_is_ignored() {
            let handler = create_handler();

            let response = handler.handle(IpcRequest::StartTimer).await;

            assert!(response.is_success());
            assert!(response.message.contains("start ignored"));
            assert!(!response.timer_state().unwrap().running);
        }

        #[tokio::test]
        async fn test_start_and_stop_with_surface() {
            let handler = create_handler();
            let (_response, stream) = handler.attach(Some(SurfaceId::new("w"))).await;
            let _stream = stream.unwrap();

            let response = handler.handle(IpcRequest::StartTimer).await;
            assert_eq!(response.message, "Timer started");
            assert!(response.timer_state().unwrap().running);

            let response = handler.handle(IpcRequest::StopTimer).await;
            assert_eq!(response.message, "Timer stopped");
            assert!(!response.timer_state().unwrap().running);
        }

        #[tokio::test]
        async fn test_attach_generates_surface_id() {
            let handler = create_handler();

            let (response, stream) = handler.attach(None).await;

            let (surface_id, _rx) = stream.unwrap();
            let data = response.data.unwrap();
            assert_eq!(data.surface_id, Some(surface_id));
            assert!(data.timer_state.unwrap().surface_attached);
        }

        #[tokio::test]
        async fn test_update_then_reset() {
            let handler = create_handler();

            let response = handler
                .handle(IpcRequest::UpdateTimerState {
                    time_left: Some(300),
                    total_time: Some(300),
                })
                .await;
            assert_eq!(response.timer_state().unwrap().total_duration_seconds, 300);

            let response = handler.handle(IpcRequest::ResetTimer).await;
            assert_eq!(response.timer_state().unwrap().remaining_seconds, 300);
        }

        #[tokio::test]
        async fn test_popup_closed_detaches() {
            let handler = create_handler();
            let (_response, stream) = handler.attach(Some(SurfaceId::new("w"))).await;
            let _stream = stream.unwrap();

            let response = handler
                .handle(IpcRequest::PopupClosed {
                    surface_id: Some(SurfaceId::new("w")),
                })
                .await;

            assert!(!response.timer_state().unwrap().surface_attached);
        }

        #[tokio::test]
        async fn test_open_window_created() {
            let handler = create_handler();

            let response = handler.handle(IpcRequest::OpenTimerWindow).await;

            assert_eq!(response.data.unwrap().window, Some(WindowAction::Created));
        }

        #[tokio::test]
        async fn test_ping() {
            let handler = create_handler();

            let response = handler.handle(IpcRequest::Ping).await;

            assert_eq!(response.data.unwrap().received, Some(true));
        }
    }

    // ------------------------------------------------------------------------
    // Push stream Tests
    // ------------------------------------------------------------------------

    mod push_stream_tests {
        use super::*;

        async fn read_json(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> serde_json::Value {
            let line = lines.next_line().await.unwrap().unwrap();
            serde_json::from_str(&line).unwrap()
        }

        /// Next push that is not a heartbeat ping.
        async fn read_push(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> serde_json::Value {
            loop {
                let push = read_json(lines).await;
                if push["action"] != "ping" {
                    return push;
                }
            }
        }

        #[tokio::test]
        async fn test_popup_opened_streams_updates_until_closed() {
            let socket_path = create_temp_socket_path();
            let server = IpcServer::new(&socket_path).unwrap();
            let handler = create_handler();

            let server_handler = handler.clone();
            tokio::spawn(async move {
                let connection = server.accept().await.unwrap();
                let _ = server_handler.serve_connection(connection).await;
                server
            });

            let stream = UnixStream::connect(&socket_path).await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            writer
                .write_all(b"{\"action\":\"popupOpened\",\"surfaceId\":\"w\"}\n")
                .await
                .unwrap();

            let response = read_json(&mut lines).await;
            assert_eq!(response["status"], "success");
            assert_eq!(response["data"]["surfaceId"], "w");

            // The attach itself is broadcast to the new subscriber
            let push = read_push(&mut lines).await;
            assert_eq!(push["action"], "timerUpdate");

            handler.handle(IpcRequest::StartTimer).await;
            let push = read_push(&mut lines).await;
            assert_eq!(push["action"], "timerUpdate");
            assert_eq!(push["timerState"]["running"], true);

            // Closing the window detaches and resets
            drop(writer);
            drop(lines);
            let mut attached = true;
            for _ in 0..50 {
                let state = handler.handle(IpcRequest::GetTimerState).await;
                attached = state.timer_state().unwrap().surface_attached;
                if !attached {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            assert!(!attached);
        }

        #[tokio::test]
        async fn test_oversized_push_stream_line_closes_window() {
            let socket_path = create_temp_socket_path();
            let server = IpcServer::new(&socket_path).unwrap();
            let handler = create_handler();

            let server_handler = handler.clone();
            tokio::spawn(async move {
                let connection = server.accept().await.unwrap();
                let _ = server_handler.serve_connection(connection).await;
                server
            });

            let stream = UnixStream::connect(&socket_path).await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            writer
                .write_all(b"{\"action\":\"popupOpened\",\"surfaceId\":\"w\"}\n")
                .await
                .unwrap();
            let response = read_json(&mut lines).await;
            assert_eq!(response["status"], "success");

            // Both halves stay open; only the size limit can end the stream
            let _ = writer.write_all(&vec![b'x'; MAX_REQUEST_SIZE * 4]).await;

            let mut attached = true;
            for _ in 0..50 {
                let state = handler.handle(IpcRequest::GetTimerState).await;
                attached = state.timer_state().unwrap().surface_attached;
                if !attached {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            assert!(!attached);
            drop(writer);
            drop(lines);
        }
    }
}
