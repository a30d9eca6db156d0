// ABOUTME: Shared coordination state ("broker") for the fleet: a key/value map served over a Unix socket.
// ABOUTME: Newline-delimited JSON requests; last writer wins per key.

use augur_fleet_core::{FleetError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;

/// Environment variable through which workers find the broker socket.
pub const BROKER_SOCKET_VAR: &str = "AUGUR_BROKER_SOCKET";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    #[serde(rename = "get")]
    Get { key: String },
    #[serde(rename = "set")]
    Set { key: String, value: Value },
    #[serde(rename = "remove")]
    Remove { key: String },
    #[serde(rename = "keys")]
    Keys,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<String>>,
}

impl Response {
    fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// The map itself. Cloning shares the same underlying state.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    inner: Arc<RwLock<HashMap<String, Value>>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.get(key).cloned()
    }

    /// Store a value, returning the one it replaced
    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.insert(key.into(), value)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.remove(key)
    }

    /// All keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = map.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn apply(&self, request: Request) -> Response {
        match request {
            Request::Get { key } => Response {
                value: self.get(&key),
                ..Response::ok()
            },
            Request::Set { key, value } => {
                self.set(key, value);
                Response::ok()
            }
            Request::Remove { key } => Response {
                value: self.remove(&key),
                ..Response::ok()
            },
            Request::Keys => Response {
                keys: Some(self.keys()),
                ..Response::ok()
            },
        }
    }
}

/// Serves a SharedState on a Unix socket until closed or dropped.
pub struct BrokerServer {
    path: PathBuf,
    task: JoinHandle<()>,
}

impl BrokerServer {
    /// Bind the socket (replacing a stale one) and start accepting connections.
    /// Must be called from within a tokio runtime.
    pub fn start(path: impl Into<PathBuf>, state: SharedState) -> Result<Self> {
        let path = path.into();
        let _ = std::fs::remove_file(&path);

        let listener = UnixListener::bind(&path).map_err(|source| FleetError::BrokerIo {
            path: path.clone(),
            source,
        })?;
        tracing::info!(path = %path.display(), "Broker listening");

        let task = tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "Broker accept failed");
                        continue;
                    }
                };
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, state).await {
                        tracing::debug!(error = %e, "Broker connection error");
                    }
                });
            }
        });

        Ok(Self { path, task })
    }

    /// Stop serving and remove the socket file. Safe to call more than once.
    pub fn close(&self) {
        self.task.abort();
        if std::fs::remove_file(&self.path).is_ok() {
            tracing::debug!(path = %self.path.display(), "Broker closed");
        }
    }
}

impl Drop for BrokerServer {
    fn drop(&mut self) {
        self.close();
    }
}

async fn handle_connection(stream: UnixStream, state: SharedState) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<Request>(line.trim_end()) {
            Ok(request) => state.apply(request),
            Err(e) => Response::error(format!("invalid request: {e}")),
        };
        let response_json = serde_json::to_string(&response)? + "\n";
        writer.write_all(response_json.as_bytes()).await?;
        line.clear();
    }

    Ok(())
}

/// Client side of the broker socket, used by worker processes.
pub struct BrokerClient {
    path: PathBuf,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl BrokerClient {
    pub async fn connect(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path)
            .await
            .map_err(|source| FleetError::BrokerIo {
                path: path.to_path_buf(),
                source,
            })?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(reader),
            writer,
        })
    }

    fn io_error(&self, source: std::io::Error) -> FleetError {
        FleetError::BrokerIo {
            path: self.path.clone(),
            source,
        }
    }

    async fn call(&mut self, request: &Request) -> Result<Response> {
        let json = serde_json::to_string(request)
            .map_err(|e| FleetError::Broker(e.to_string()))?
            + "\n";
        self.writer
            .write_all(json.as_bytes())
            .await
            .map_err(|e| self.io_error(e))?;

        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| self.io_error(e))?;
        if read == 0 {
            return Err(FleetError::Broker("broker closed the connection".to_string()));
        }

        let response: Response =
            serde_json::from_str(&line).map_err(|e| FleetError::Broker(e.to_string()))?;
        if !response.success {
            return Err(FleetError::Broker(
                response.error.unwrap_or_else(|| "request failed".to_string()),
            ));
        }
        Ok(response)
    }

    pub async fn get(&mut self, key: &str) -> Result<Option<Value>> {
        let response = self
            .call(&Request::Get {
                key: key.to_string(),
            })
            .await?;
        Ok(response.value)
    }

    pub async fn set(&mut self, key: &str, value: Value) -> Result<()> {
        self.call(&Request::Set {
            key: key.to_string(),
            value,
        })
        .await?;
        Ok(())
    }

    pub async fn remove(&mut self, key: &str) -> Result<Option<Value>> {
        let response = self
            .call(&Request::Remove {
                key: key.to_string(),
            })
            .await?;
        Ok(response.value)
    }

    pub async fn keys(&mut self) -> Result<Vec<String>> {
        let response = self.call(&Request::Keys).await?;
        Ok(response.keys.unwrap_or_default())
    }
}
