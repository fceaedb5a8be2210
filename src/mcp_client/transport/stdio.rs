//! JSON-RPC over stdio transport.
//!
//! Handles low-level communication with MCP server child processes:
//! - Writing JSON-RPC requests to stdin (one JSON object per line)
//! - Reading JSON-RPC responses from stdout, skipping notifications and
//!   replies to other ids
//! - Draining stderr continuously into the log so the child never blocks on
//!   a full pipe
//!
//! Replies are matched on a single shared stream, so every send+receive cycle
//! runs under one exclusive lock.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

use super::{Transport, TransportKind};
use crate::mcp_client::errors::McpError;
use crate::mcp_client::types::{
    error_codes, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, StdioServerConfig,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Timeout for graceful shutdown before force-killing.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Read Limits ─────────────────────────────────────────────────────────────

/// Bounds on how long a round trip may wait for its reply.
///
/// Every received line and every empty poll counts as one attempt, so a
/// silent peer fails after roughly `max_attempts * poll_interval`.
#[derive(Debug, Clone, Copy)]
pub struct ReadLimits {
    pub max_attempts: u32,
    pub poll_interval: Duration,
    pub max_line_bytes: usize,
}

impl Default for ReadLimits {
    fn default() -> Self {
        Self {
            max_attempts: 600,
            poll_interval: Duration::from_millis(100),
            max_line_bytes: 8 * 1024 * 1024,
        }
    }
}

impl ReadLimits {
    /// Spend roughly `timeout` of silence before giving up on a reply.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        let poll_ms = self.poll_interval.as_millis().max(1);
        let attempts = timeout.as_millis().div_ceil(poll_ms).max(1);
        Self {
            max_attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
            ..self
        }
    }
}

// ─── Transport ───────────────────────────────────────────────────────────────

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A live stdio channel: the write half, the framed read half, and the
/// process that owns them (absent for in-memory streams).
struct StdioSession {
    writer: BoxedWriter,
    lines: FramedRead<BoxedReader, LinesCodec>,
    child: Option<Child>,
    stderr_task: Option<JoinHandle<()>>,
}

/// Bi-directional JSON-RPC transport over a child process's stdio.
pub struct StdioTransport {
    server_name: String,
    config: Option<StdioServerConfig>,
    limits: ReadLimits,
    session: Mutex<Option<StdioSession>>,
}

impl StdioTransport {
    /// Create a transport that spawns `config.command` on `connect()`.
    ///
    /// `config.read_timeout_secs`, when set, sizes the per-call read budget.
    pub fn new(server_name: &str, config: StdioServerConfig) -> Self {
        let limits = match config.read_timeout_secs {
            Some(secs) => ReadLimits::default().with_timeout(Duration::from_secs(secs)),
            None => ReadLimits::default(),
        };
        Self {
            server_name: server_name.to_string(),
            config: Some(config),
            limits,
            session: Mutex::new(None),
        }
    }

    /// Create an already-connected transport over arbitrary streams.
    ///
    /// Used for in-process peers; `connect()` is a no-op for these.
    pub fn from_streams<R, W>(server_name: &str, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let limits = ReadLimits::default();
        let reader: BoxedReader = Box::new(reader);
        Self {
            server_name: server_name.to_string(),
            config: None,
            limits,
            session: Mutex::new(Some(StdioSession {
                writer: Box::new(writer),
                lines: FramedRead::new(reader, LinesCodec::new_with_max_length(limits.max_line_bytes)),
                child: None,
                stderr_task: None,
            })),
        }
    }

    /// Override the read-attempt budget.
    pub fn with_limits(mut self, limits: ReadLimits) -> Self {
        self.limits = limits;
        self
    }

    fn transport_error(&self, reason: impl Into<String>) -> McpError {
        McpError::Transport {
            server: self.server_name.clone(),
            reason: reason.into(),
        }
    }

    /// Spawn the configured child process with piped stdio.
    fn spawn(&self, config: &StdioServerConfig) -> Result<StdioSession, McpError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);

        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        if let Some(dir) = config.cwd.as_deref() {
            cmd.current_dir(dir);
        }

        // Windows: prevent console window from appearing for child processes
        #[cfg(target_os = "windows")]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: self.server_name.clone(),
            reason: format!("{e}"),
        })?;

        let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
            name: self.server_name.clone(),
            reason: "failed to capture stdin".into(),
        })?;

        let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
            name: self.server_name.clone(),
            reason: "failed to capture stdout".into(),
        })?;

        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(drain_stderr(self.server_name.clone(), stderr)));

        let reader: BoxedReader = Box::new(stdout);
        Ok(StdioSession {
            writer: Box::new(stdin),
            lines: FramedRead::new(
                reader,
                LinesCodec::new_with_max_length(self.limits.max_line_bytes),
            ),
            child: Some(child),
            stderr_task,
        })
    }

    /// Write one line and flush.
    async fn write_line(&self, session: &mut StdioSession, json: &str) -> Result<(), McpError> {
        session
            .writer
            .write_all(json.as_bytes())
            .await
            .map_err(|e| self.transport_error(format!("failed to write to stdin: {e}")))?;
        session
            .writer
            .write_all(b"\n")
            .await
            .map_err(|e| self.transport_error(format!("failed to write to stdin: {e}")))?;
        session
            .writer
            .flush()
            .await
            .map_err(|e| self.transport_error(format!("failed to flush stdin: {e}")))
    }

    /// Read lines until one answers `id`, or the attempt budget runs out.
    async fn read_response(
        &self,
        session: &mut StdioSession,
        id: u64,
    ) -> Result<JsonRpcResponse, McpError> {
        for _ in 0..self.limits.max_attempts {
            let next = match tokio::time::timeout(self.limits.poll_interval, session.lines.next()).await
            {
                Err(_) => continue,
                Ok(next) => next,
            };

            let line = match next {
                None => {
                    return Err(
                        self.transport_error("server stdout closed (process may have exited)")
                    )
                }
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    tracing::warn!(
                        server = %self.server_name,
                        max_bytes = self.limits.max_line_bytes,
                        "oversized line from server"
                    );
                    return Ok(JsonRpcResponse::synthetic_error(
                        id,
                        error_codes::PARSE_ERROR,
                        format!("line exceeded {} bytes", self.limits.max_line_bytes),
                    ));
                }
                Some(Err(LinesCodecError::Io(e))) => {
                    return Err(self.transport_error(format!("failed to read from stdout: {e}")))
                }
                Some(Ok(line)) => line,
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                Ok(resp) if resp.answers(id) => return Ok(resp),
                Ok(resp) => {
                    tracing::debug!(
                        server = %self.server_name,
                        expected = id,
                        got = ?resp.id,
                        method = ?resp.method,
                        "skipping notification or stale response"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        server = %self.server_name,
                        error = %e,
                        line = %crate::agent_core::tokens::truncate_utf8(trimmed, 200),
                        "parse error on server stdout"
                    );
                    return Ok(JsonRpcResponse::synthetic_error(
                        id,
                        error_codes::PARSE_ERROR,
                        format!("invalid JSON from server: {e}"),
                    ));
                }
            }
        }

        Err(McpError::Timeout {
            server: self.server_name.clone(),
            attempts: self.limits.max_attempts,
        })
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn connect(&self) -> Result<(), McpError> {
        let mut guard = self.session.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let config = self.config.as_ref().ok_or(McpError::Config {
            reason: format!("server '{}' has no command to spawn", self.server_name),
        })?;

        let session = self.spawn(config)?;
        tracing::info!(
            server = %self.server_name,
            command = %config.command,
            pid = ?session.child.as_ref().and_then(|c| c.id()),
            "spawned stdio server"
        );
        *guard = Some(session);
        Ok(())
    }

    async fn send(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
        let json = serde_json::to_string(request).map_err(|e| McpError::Parse {
            reason: format!("failed to serialize request: {e}"),
        })?;

        // Held across the whole write+read cycle.
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(McpError::NotConnected {
            server: self.server_name.clone(),
        })?;

        self.write_line(session, &json).await?;
        self.read_response(session, request.id).await
    }

    async fn notify(&self, notification: &JsonRpcNotification) -> Result<(), McpError> {
        let json = serde_json::to_string(notification).map_err(|e| McpError::Parse {
            reason: format!("failed to serialize notification: {e}"),
        })?;

        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(McpError::NotConnected {
            server: self.server_name.clone(),
        })?;
        self.write_line(session, &json).await
    }

    async fn close(&self) -> Result<(), McpError> {
        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };

        let StdioSession {
            writer,
            child,
            stderr_task,
            ..
        } = session;

        // Closing stdin is the shutdown signal for stdio servers.
        drop(writer);

        if let Some(mut child) = child {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::info!(server = %self.server_name, %status, "server exited");
                }
                _ => {
                    tracing::warn!(
                        server = %self.server_name,
                        "server did not exit after stdin closed, killing"
                    );
                    let _ = child.kill().await;
                }
            }
        }

        if let Some(task) = stderr_task {
            task.abort();
        }
        Ok(())
    }
}

/// Forward every stderr line to the log until the pipe closes.
async fn drain_stderr(server: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::debug!(server = %server, line = %line, "server stderr"),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(server = %server, error = %e, "stderr drain stopped");
                break;
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;

    /// Wire a transport to an in-process peer. `handler` maps each request
    /// to the raw lines the peer writes back.
    fn fake_peer<F>(handler: F) -> StdioTransport
    where
        F: Fn(serde_json::Value) -> Vec<String> + Send + 'static,
    {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, mut server_write) = tokio::io::split(server);

        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let Ok(req) = serde_json::from_str::<serde_json::Value>(&line) else {
                    continue;
                };
                for out in handler(req) {
                    if server_write.write_all(out.as_bytes()).await.is_err()
                        || server_write.write_all(b"\n").await.is_err()
                    {
                        return;
                    }
                }
                let _ = server_write.flush().await;
            }
        });

        StdioTransport::from_streams("fake", client_read, client_write)
    }

    fn fast_limits(max_attempts: u32) -> ReadLimits {
        ReadLimits {
            max_attempts,
            poll_interval: Duration::from_millis(10),
            ..ReadLimits::default()
        }
    }

    #[tokio::test]
    async fn test_skips_notifications_and_stale_ids() {
        let transport = fake_peer(|req| {
            let id = req["id"].as_u64().unwrap();
            vec![
                r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{}}"#.to_string(),
                format!(r#"{{"jsonrpc":"2.0","id":{},"result":{{"stale":true}}}}"#, id + 100),
                format!(r#"{{"jsonrpc":"2.0","id":{id},"result":{{"ok":true}}}}"#),
            ]
        });

        let resp = transport
            .send(&JsonRpcRequest::new(3, "tools/list", None))
            .await
            .unwrap();
        assert_eq!(resp.numeric_id(), Some(3));
        assert_eq!(resp.result.unwrap()["ok"], true);
    }

    #[tokio::test]
    async fn test_unparseable_line_becomes_parse_error_response() {
        let transport = fake_peer(|_| vec!["Traceback (most recent call last):".to_string()]);

        let resp = transport
            .send(&JsonRpcRequest::new(1, "tools/list", None))
            .await
            .unwrap();
        assert!(resp.answers(1));
        assert_eq!(resp.error.unwrap().code, error_codes::PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let transport = fake_peer(|_| Vec::new()).with_limits(fast_limits(3));

        let err = transport
            .send(&JsonRpcRequest::new(1, "initialize", None))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Timeout { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_closed_peer_is_transport_error() {
        let (client, server) = tokio::io::duplex(1024);
        drop(server);
        let (r, w) = tokio::io::split(client);
        let transport = StdioTransport::from_streams("gone", r, w).with_limits(fast_limits(5));

        let err = transport
            .send(&JsonRpcRequest::new(1, "initialize", None))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_send_before_connect_fails_fast() {
        let transport = StdioTransport::new(
            "never-started",
            StdioServerConfig {
                command: "does-not-matter".into(),
                args: vec![],
                env: HashMap::new(),
                cwd: None,
                read_timeout_secs: None,
            },
        );
        let err = transport
            .send(&JsonRpcRequest::new(1, "tools/list", None))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::NotConnected { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_sends_are_serialized_and_correlated() {
        let transport = Arc::new(fake_peer(|req| {
            let id = req["id"].as_u64().unwrap();
            vec![format!(r#"{{"jsonrpc":"2.0","id":{id},"result":{{"echo":{id}}}}}"#)]
        }));

        let mut handles = Vec::new();
        for id in 1..=8u64 {
            let t = Arc::clone(&transport);
            handles.push(tokio::spawn(async move {
                let resp = t
                    .send(&JsonRpcRequest::new(id, "tools/list", None))
                    .await
                    .unwrap();
                (id, resp.result.unwrap()["echo"].as_u64().unwrap())
            }));
        }

        for handle in handles {
            let (sent, echoed) = handle.await.unwrap();
            assert_eq!(sent, echoed);
        }
    }

    #[test]
    fn test_read_timeout_sizes_attempt_budget() {
        let config = |read_timeout_secs| StdioServerConfig {
            command: "unused".into(),
            args: vec![],
            env: HashMap::new(),
            cwd: None,
            read_timeout_secs,
        };
        assert_eq!(StdioTransport::new("a", config(None)).limits.max_attempts, 600);
        assert_eq!(StdioTransport::new("b", config(Some(300))).limits.max_attempts, 3_000);
        assert_eq!(StdioTransport::new("c", config(Some(0))).limits.max_attempts, 1);

        let limits = fast_limits(1).with_timeout(Duration::from_millis(25));
        assert_eq!(limits.max_attempts, 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_configured_read_timeout_bounds_silent_process() {
        let transport = StdioTransport::new(
            "mute",
            StdioServerConfig {
                command: "sh".into(),
                args: vec!["-c".into(), "while read line; do :; done".into()],
                env: HashMap::new(),
                cwd: None,
                read_timeout_secs: Some(1),
            },
        );
        transport.connect().await.unwrap();

        let started = std::time::Instant::now();
        let err = transport
            .send(&JsonRpcRequest::new(1, "tools/call", None))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Timeout { attempts: 10, .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let transport = StdioTransport::new(
            "missing",
            StdioServerConfig {
                command: "/nonexistent/toolrelay-test-binary".into(),
                args: vec![],
                env: HashMap::new(),
                cwd: None,
                read_timeout_secs: None,
            },
        );
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, McpError::SpawnFailed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawned_process_round_trip_with_stderr_noise() {
        let script = r#"for i in 1 2 3; do echo "warming up $i" >&2; done
while read line; do echo '{"jsonrpc":"2.0","id":1,"result":{"ready":true}}'; done"#;
        let transport = StdioTransport::new(
            "sh",
            StdioServerConfig {
                command: "sh".into(),
                args: vec!["-c".into(), script.into()],
                env: HashMap::new(),
                cwd: None,
                read_timeout_secs: None,
            },
        );

        transport.connect().await.unwrap();
        let resp = transport
            .send(&JsonRpcRequest::new(1, "initialize", None))
            .await
            .unwrap();
        assert_eq!(resp.result.unwrap()["ready"], true);

        transport.close().await.unwrap();
        let err = transport
            .send(&JsonRpcRequest::new(2, "tools/list", None))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::NotConnected { .. }));
    }
}
