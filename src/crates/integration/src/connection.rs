//! A running account worker and its request/response channel.
//!
//! A writer task owns stdin and writes each request as one whole JSON line,
//! so a caller cancelled mid-request never leaves a partial line behind. A
//! reader task owns stdout and routes each response line to the caller
//! waiting on the matching request id. When either stream fails, every
//! waiting caller is failed and the connection is marked dead so the pool
//! replaces it.

use crate::config::{CredentialResolver, WorkerConfig};
use crate::error::{IntegrationError, Result};
use crate::kind::AccountTarget;
use crate::protocol::{Request, Response, PROTOCOL_VERSION};
use parking_lot::Mutex as SyncMutex;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

type Reply = std::result::Result<Response, String>;
type PendingCalls = Arc<SyncMutex<HashMap<u64, oneshot::Sender<Reply>>>>;
/// A request line and where to report whether it was written
type WriteJob = (String, oneshot::Sender<std::io::Result<()>>);

/// Connection to one worker process
pub struct Connection {
    account: String,
    pid: Option<u32>,
    child: Mutex<Child>,
    writes: mpsc::UnboundedSender<WriteJob>,
    pending: PendingCalls,
    alive: Arc<AtomicBool>,
    next_id: AtomicU64,
    in_flight: Semaphore,
    active_calls: AtomicUsize,
    call_timeout: Duration,
    last_used: SyncMutex<Instant>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("account", &self.account)
            .field("pid", &self.pid)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl Connection {
    /// Spawn the worker for `target` and complete the handshake.
    pub async fn spawn(
        target: &AccountTarget,
        config: &WorkerConfig,
        credentials: &dyn CredentialResolver,
    ) -> Result<Self> {
        let secret = credentials.resolve(target)?;
        let spawn_error = |source: std::io::Error| IntegrationError::ProcessSpawn {
            account: target.alias.clone(),
            source,
        };

        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .env(&config.credential_env, secret)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let stdin = child.stdin.take().ok_or_else(|| {
            spawn_error(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "worker stdin unavailable",
            ))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            spawn_error(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "worker stdout unavailable",
            ))
        })?;
        let pid = child.id();

        let pending: PendingCalls = Arc::default();
        let alive = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(read_responses(
            target.alias.clone(),
            stdout,
            pending.clone(),
            alive.clone(),
        ));
        let (writes, jobs) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_requests(target.alias.clone(), stdin, jobs, alive.clone()));

        let connection = Self {
            account: target.alias.clone(),
            pid,
            child: Mutex::new(child),
            writes,
            pending,
            alive,
            next_id: AtomicU64::new(0),
            in_flight: Semaphore::new(config.max_in_flight.max(1)),
            active_calls: AtomicUsize::new(0),
            call_timeout: config.call_timeout(),
            last_used: SyncMutex::new(Instant::now()),
            reader,
            writer,
        };

        info!(
            account = %connection.account,
            pid = ?pid,
            command = %config.command,
            "Spawned worker process"
        );

        connection.handshake(config.handshake_timeout()).await?;
        Ok(connection)
    }

    async fn handshake(&self, limit: Duration) -> Result<()> {
        let request = Request::handshake(self.next_request_id());
        let result = self
            .exchange(request, limit)
            .await
            .map_err(|e| self.handshake_error(e.to_string()))?;

        let version = result.get("protocolVersion").and_then(Value::as_str);
        if version != Some(PROTOCOL_VERSION) {
            return Err(self.handshake_error(format!(
                "unsupported protocol version {:?}, expected {}",
                version, PROTOCOL_VERSION
            )));
        }

        debug!(account = %self.account, version = PROTOCOL_VERSION, "Worker handshake complete");
        Ok(())
    }

    fn handshake_error(&self, reason: String) -> IntegrationError {
        IntegrationError::Handshake {
            account: self.account.clone(),
            reason,
        }
    }

    /// Send one request and wait for its response.
    pub async fn call(&self, operation: &str, parameters: Value) -> Result<Value> {
        let request = Request {
            id: self.next_request_id(),
            operation: operation.to_string(),
            parameters,
        };
        self.exchange(request, self.call_timeout).await
    }

    async fn exchange(&self, request: Request, limit: Duration) -> Result<Value> {
        if !self.is_alive() {
            return Err(IntegrationError::protocol(
                &request.operation,
                "worker is not running",
            ));
        }
        let _permit = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| IntegrationError::protocol(&request.operation, "connection closed"))?;

        let _active = ActiveCall::enter(&self.active_calls);
        let result = self.send_and_wait(&request, limit).await;
        self.touch();
        result
    }

    async fn send_and_wait(&self, request: &Request, limit: Duration) -> Result<Value> {
        let id = request.id;
        let operation = request.operation.as_str();
        let line = request.to_line()?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        // The reader clears pending calls after marking the connection dead.
        if !self.is_alive() {
            self.pending.lock().remove(&id);
            return Err(IntegrationError::protocol(operation, "worker is not running"));
        }

        debug!(account = %self.account, id, operation, "Sending worker request");
        let (written_tx, written_rx) = oneshot::channel();
        let written = match self.writes.send((line, written_tx)) {
            Ok(()) => written_rx
                .await
                .unwrap_or_else(|_| Err(std::io::ErrorKind::BrokenPipe.into())),
            Err(_) => Err(std::io::ErrorKind::BrokenPipe.into()),
        };
        if let Err(e) = written {
            self.pending.lock().remove(&id);
            return Err(IntegrationError::protocol(
                operation,
                format!("failed to write request: {}", e),
            ));
        }

        match timeout(limit, rx).await {
            Ok(Ok(Ok(response))) => response.into_result(operation),
            Ok(Ok(Err(reason))) => Err(IntegrationError::protocol(operation, reason)),
            Ok(Err(_)) => Err(IntegrationError::protocol(
                operation,
                "worker closed its output before responding",
            )),
            Err(_) => {
                self.pending.lock().remove(&id);
                warn!(account = %self.account, id, operation, timeout_ms = limit.as_millis() as u64, "Worker call timed out");
                Err(IntegrationError::RpcTimeout {
                    operation: operation.to_string(),
                    timeout_ms: limit.as_millis() as u64,
                })
            }
        }
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// OS process id of the worker
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn active_calls(&self) -> usize {
        self.active_calls.load(Ordering::SeqCst)
    }

    /// Time since the connection was last used
    pub fn idle_for(&self) -> Duration {
        Instant::now().saturating_duration_since(*self.last_used.lock())
    }

    pub(crate) fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    /// Kill the worker and fail any outstanding calls.
    pub async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.in_flight.close();
        if let Err(e) = self.child.lock().await.kill().await {
            debug!(account = %self.account, error = %e, "Worker already exited");
        }
        self.reader.abort();
        self.writer.abort();
        self.pending.lock().clear();
        info!(account = %self.account, pid = ?self.pid, "Closed worker connection");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Counts a call as active until dropped, including when the caller is cancelled.
struct ActiveCall<'a>(&'a AtomicUsize);

impl<'a> ActiveCall<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn write_requests(
    account: String,
    mut stdin: ChildStdin,
    mut jobs: mpsc::UnboundedReceiver<WriteJob>,
    alive: Arc<AtomicBool>,
) {
    while let Some((line, written)) = jobs.recv().await {
        let result = match stdin.write_all(line.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        let failed = result.is_err();
        if let Err(e) = &result {
            warn!(account = %account, error = %e, "Failed to write to worker input");
            alive.store(false, Ordering::SeqCst);
        }
        // The caller may have been cancelled; the line is complete either way.
        let _ = written.send(result);
        if failed {
            break;
        }
    }
}

async fn read_responses(
    account: String,
    stdout: ChildStdout,
    pending: PendingCalls,
    alive: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => route_line(&account, &line, &pending),
            Ok(None) => break,
            Err(e) => {
                warn!(account = %account, error = %e, "Failed to read worker output");
                break;
            }
        }
    }

    alive.store(false, Ordering::SeqCst);
    pending.lock().clear();
    info!(account = %account, "Worker output closed");
}

fn route_line(account: &str, line: &str, pending: &PendingCalls) {
    if line.trim().is_empty() {
        return;
    }
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(_) => {
            warn!(account = %account, line = %line, "Ignoring non-JSON worker output");
            return;
        }
    };
    let Some(id) = value.get("id").and_then(Value::as_u64) else {
        warn!(account = %account, "Ignoring worker message without a request id");
        return;
    };
    let Some(sender) = pending.lock().remove(&id) else {
        debug!(account = %account, id, "Dropping response without a waiting caller");
        return;
    };

    let reply = serde_json::from_value::<Response>(value)
        .map_err(|e| format!("malformed response: {}", e));
    let _ = sender.send(reply);
}
