// IPC Server - Listens for client connections and handles requests

use crate::error::{Result, WardenError};
use crate::ipc::{Command, Request, Response, ResponseData};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// How long open connections may take to finish once serving stops
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// IPC server for handling client connections
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
}

impl IpcServer {
    /// Bind to the Unix socket at `path`
    ///
    /// A stale socket file is replaced. The socket is only accessible by
    /// its owner (0600). Must be called from within a tokio runtime.
    pub fn bind<P: AsRef<Path>>(path: P) -> Result<Self> {
        let socket_path = path.as_ref().to_path_buf();

        if let Some(parent) = socket_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    WardenError::IpcError(format!("Failed to create socket directory: {}", e))
                })?;
            }
        }

        // Remove existing socket file if it exists
        if socket_path.exists() {
            std::fs::remove_file(&socket_path).map_err(|e| {
                WardenError::IpcError(format!("Failed to remove existing socket: {}", e))
            })?;
        }

        let listener = UnixListener::bind(&socket_path)
            .map_err(|e| WardenError::IpcError(format!("Failed to bind to socket: {}", e)))?;

        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&socket_path, permissions).map_err(|e| {
                WardenError::IpcError(format!("Failed to set socket permissions: {}", e))
            })?;
        }

        Ok(Self {
            socket_path,
            listener: Some(listener),
        })
    }

    /// Run the accept loop, one task per connection, until `shutdown` fires
    ///
    /// Connections still open at shutdown get a short window to finish
    /// writing their responses before they are dropped.
    pub async fn serve<F, Fut, S>(&self, handler: F, shutdown: S) -> Result<()>
    where
        F: Fn(Command) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ResponseData>> + Send,
        S: Future<Output = ()>,
    {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| WardenError::IpcError("Server not started".to_string()))?;
        let handler = Arc::new(handler);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => {
                    let stream = match accepted {
                        Ok((stream, _addr)) => stream,
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                            continue;
                        }
                    };

                    let handler = Arc::clone(&handler);
                    connections.spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, handler.as_ref()).await {
                            warn!(error = %e, "connection closed with error");
                        }
                    });
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        let drain = async { while connections.join_next().await.is_some() {} };
        if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
            warn!("dropping control connections still open at shutdown");
            connections.abort_all();
        }

        Ok(())
    }

    /// Answer every request on one connection until the client hangs up
    async fn handle_connection<F, Fut>(stream: UnixStream, handler: &F) -> Result<()>
    where
        F: Fn(Command) -> Fut,
        Fut: Future<Output = Result<ResponseData>>,
    {
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| WardenError::IpcError(format!("Failed to read request: {}", e)))?
        {
            if line.trim().is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<Request>(&line) {
                Ok(request) => {
                    debug!(id = request.id, command = ?request.command, "request received");
                    match handler(request.command).await {
                        Ok(data) => Response::success(request.id, data),
                        Err(e) => Response::error(request.id, e.to_string()),
                    }
                }
                Err(e) => Response::error(0, format!("Failed to deserialize request: {}", e)),
            };

            let mut response_json = serde_json::to_string(&response).map_err(|e| {
                WardenError::SerializationError(format!("Failed to serialize response: {}", e))
            })?;
            response_json.push('\n');

            writer
                .write_all(response_json.as_bytes())
                .await
                .map_err(|e| WardenError::IpcError(format!("Failed to write response: {}", e)))?;
            writer
                .flush()
                .await
                .map_err(|e| WardenError::IpcError(format!("Failed to flush stream: {}", e)))?;
        }

        Ok(())
    }

    /// Stop the server and clean up the socket file
    pub fn stop(&mut self) -> Result<()> {
        self.listener = None;

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| {
                WardenError::IpcError(format!("Failed to remove socket file: {}", e))
            })?;
        }

        Ok(())
    }

    /// Get the socket path being used
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        // Clean up socket file on drop
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_server_bind_stop() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("warden.sock");

        let mut server = IpcServer::bind(&socket_path).unwrap();
        assert_eq!(server.socket_path(), socket_path.as_path());
        assert!(socket_path.exists());

        let mode = std::fs::metadata(&socket_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        server.stop().unwrap();
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn test_server_replaces_stale_socket() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("stale.sock");
        std::fs::write(&socket_path, b"").unwrap();

        let server = IpcServer::bind(&socket_path).unwrap();
        assert!(server.socket_path().exists());
    }

    #[tokio::test]
    async fn test_server_cleanup_on_drop() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("drop.sock");
        {
            let _server = IpcServer::bind(&socket_path).unwrap();
            assert!(socket_path.exists());
        }
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn test_serve_answers_requests_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("serve.sock");
        let server = IpcServer::bind(&socket_path).unwrap();

        let serving = tokio::spawn(async move {
            server
                .serve(|command| async move {
                    match command {
                        Command::Stop { name } => Ok(ResponseData::Stopped { name }),
                        _ => Err(WardenError::Other("unsupported".to_string())),
                    }
                }, std::future::pending())
                .await
        });

        let stream = UnixStream::connect(&socket_path).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer
            .write_all(b"{\"id\":5,\"command\":{\"Stop\":{\"name\":\"api\"}}}\n{\"id\":6,\"command\":\"Shutdown\"}\nnot json\n")
            .await
            .unwrap();

        let first: Response = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(first.id, 5);
        assert_eq!(
            first.result,
            Ok(ResponseData::Stopped {
                name: "api".to_string()
            })
        );

        let second: Response = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(second.id, 6);
        assert_eq!(second.result, Err("unsupported".to_string()));

        let third: Response = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert!(third.result.is_err());

        serving.abort();
    }

    #[tokio::test]
    async fn test_serve_returns_on_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("shutdown.sock");
        let server = IpcServer::bind(&socket_path).unwrap();
        let stop = Arc::new(tokio::sync::Notify::new());

        let serving = {
            let stop = Arc::clone(&stop);
            tokio::spawn(async move {
                let result = server
                    .serve(
                        |_| async { Ok(ResponseData::Success("ok".to_string())) },
                        stop.notified(),
                    )
                    .await;
                (result, server)
            })
        };

        stop.notify_one();
        let (result, server) = tokio::time::timeout(Duration::from_secs(5), serving)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        drop(server);
        assert!(!socket_path.exists());
    }
}
