//! Unix-socket front end of the policy service.
//!
//! Two listeners share one [`EgressPolicy`]: the query socket answers each
//! request line with `0` or `1`, the DNS socket records observations and
//! never answers. Every accepted connection runs on its own task, and within
//! a connection the response to one line is written before the next is read.

pub mod cache;
pub mod egress;
pub mod protocol;

use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::config::SocketsConfig;
use crate::server::cache::HostCache;
use crate::server::egress::EgressPolicy;
use crate::server::protocol::Decision;

/// Pause after a failed `accept` so a persistent error does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Errors from binding the listeners or talking to a running service.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The socket's parent directory could not be created.
    #[error("failed to create socket directory {path}: {source}")]
    Directory {
        /// Directory path.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// Something other than a socket occupies the socket path.
    #[error("{path} exists but is not a socket")]
    NotASocket {
        /// Socket path.
        path: PathBuf,
    },
    /// A stale socket file could not be removed.
    #[error("failed to remove stale socket {path}: {source}")]
    StaleSocket {
        /// Socket path.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// Binding failed.
    #[error("failed to bind {path}: {source}")]
    Bind {
        /// Socket path.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// The socket mode could not be applied.
    #[error("failed to set permissions on {path}: {source}")]
    Permissions {
        /// Socket path.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// Client-side connect, write or read failed.
    #[error("i/o error on {path}: {source}")]
    Io {
        /// Socket path.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// The service answered with something other than `0` or `1`.
    #[error("unexpected response {0:?}")]
    BadResponse(String),
}

/// A socket file this process created, identified by device and inode.
#[derive(Debug)]
struct SocketFile {
    path: PathBuf,
    dev: u64,
    ino: u64,
}

impl SocketFile {
    /// Remove the file only if it is still the one we bound. A later
    /// instance may have replaced it at the same path.
    fn remove_if_owned(&self) {
        let path = &self.path;
        match std::fs::symlink_metadata(path) {
            Ok(meta) if meta.dev() == self.dev && meta.ino() == self.ino => {
                match std::fs::remove_file(path) {
                    Ok(()) => debug!(path = %path.display(), "removed socket file"),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "failed to remove socket file");
                    }
                }
            }
            Ok(_) => debug!(path = %path.display(), "socket file replaced, leaving it"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to stat socket file"),
        }
    }
}

/// Bound query and DNS listeners. Socket files are removed on drop unless
/// another instance has since bound the same path.
pub struct PolicyServer {
    query: UnixListener,
    dns: UnixListener,
    query_file: SocketFile,
    dns_file: SocketFile,
    policy: EgressPolicy,
}

impl PolicyServer {
    /// Bind both sockets and apply the configured mode.
    ///
    /// # Errors
    ///
    /// Returns an error if either path is occupied by a non-socket, or if
    /// directory creation, binding or `chmod` fails.
    pub fn bind(sockets: &SocketsConfig, policy: EgressPolicy) -> Result<Self, ServerError> {
        let (query, query_file) = bind_socket(&sockets.query, sockets.mode)?;
        let (dns, dns_file) = bind_socket(&sockets.dns, sockets.mode)?;
        info!(
            query = %sockets.query.display(),
            dns = %sockets.dns.display(),
            mode = %format!("{:o}", sockets.mode),
            "policy sockets bound"
        );
        Ok(Self {
            query,
            dns,
            query_file,
            dns_file,
            policy,
        })
    }

    /// Path of the query socket.
    pub fn query_path(&self) -> &Path {
        &self.query_file.path
    }

    /// Path of the DNS-observation socket.
    pub fn dns_path(&self) -> &Path {
        &self.dns_file.path
    }

    /// Accept connections on both sockets until the future is dropped.
    pub async fn run(&self) {
        tokio::join!(self.accept_queries(), self.accept_observations());
    }

    async fn accept_queries(&self) {
        loop {
            match self.query.accept().await {
                Ok((stream, _)) => {
                    tokio::spawn(serve_query_connection(stream, self.policy.clone()));
                }
                Err(e) => {
                    warn!(error = %e, "query accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    async fn accept_observations(&self) {
        loop {
            match self.dns.accept().await {
                Ok((stream, _)) => {
                    tokio::spawn(serve_observation_connection(
                        stream,
                        Arc::clone(self.policy.hosts()),
                    ));
                }
                Err(e) => {
                    warn!(error = %e, "dns accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
}

impl Drop for PolicyServer {
    fn drop(&mut self) {
        self.query_file.remove_if_owned();
        self.dns_file.remove_if_owned();
    }
}

fn bind_socket(path: &Path, mode: u32) -> Result<(UnixListener, SocketFile), ServerError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|source| ServerError::Directory {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }
    cleanup_socket(path)?;
    let listener = UnixListener::bind(path).map_err(|source| ServerError::Bind {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|source| {
        ServerError::Permissions {
            path: path.to_path_buf(),
            source,
        }
    })?;
    let meta = std::fs::symlink_metadata(path).map_err(|source| ServerError::Bind {
        path: path.to_path_buf(),
        source,
    })?;
    let file = SocketFile {
        path: path.to_path_buf(),
        dev: meta.dev(),
        ino: meta.ino(),
    };
    Ok((listener, file))
}

/// Remove a leftover socket file; refuse to touch anything else.
fn cleanup_socket(path: &Path) -> Result<(), ServerError> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(ServerError::StaleSocket {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    if !metadata.file_type().is_socket() {
        return Err(ServerError::NotASocket {
            path: path.to_path_buf(),
        });
    }
    std::fs::remove_file(path).map_err(|source| ServerError::StaleSocket {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "removed stale socket file");
    Ok(())
}

/// Answer request lines on one query connection until it closes.
///
/// I/O errors end the connection and are logged; they never reach the
/// listener.
pub async fn serve_query_connection<S>(stream: S, policy: EgressPolicy)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("query connection closed");
                return;
            }
            Err(e) => {
                warn!(error = %e, "query connection read failed");
                return;
            }
        };
        let decision = policy.decide(line.trim_end_matches('\r'));
        let reply = format!("{}\n", decision.code());
        if let Err(e) = write_reply(&mut writer, reply.as_bytes()).await {
            warn!(error = %e, "query connection write failed");
            return;
        }
    }
}

async fn write_reply<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// Record observation lines from one DNS connection until it closes.
pub async fn serve_observation_connection<S>(stream: S, hosts: Arc<HostCache>)
where
    S: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if !hosts.observe(line.trim_end_matches('\r')) {
                    debug!(line, "ignoring short observation");
                }
            }
            Ok(None) => {
                debug!("dns connection closed");
                return;
            }
            Err(e) => {
                warn!(error = %e, "dns connection read failed");
                return;
            }
        }
    }
}

fn client_io(path: &Path) -> impl FnOnce(io::Error) -> ServerError + '_ {
    move |source| ServerError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Send one request line to the query socket and return the decision.
///
/// # Errors
///
/// Returns an error on connection failure or an unrecognized response.
pub async fn send_query(path: &Path, line: &str) -> Result<Decision, ServerError> {
    let stream = UnixStream::connect(path).await.map_err(client_io(path))?;
    let (reader, mut writer) = stream.into_split();
    write_reply(&mut writer, format!("{line}\n").as_bytes())
        .await
        .map_err(client_io(path))?;

    let mut reply = String::new();
    BufReader::new(reader)
        .read_line(&mut reply)
        .await
        .map_err(client_io(path))?;
    Decision::from_code(&reply).ok_or(ServerError::BadResponse(reply))
}

/// Send one observation line to the DNS socket.
///
/// # Errors
///
/// Returns an error if the socket cannot be reached or written.
pub async fn send_observation(path: &Path, line: &str) -> Result<(), ServerError> {
    let mut stream = UnixStream::connect(path).await.map_err(client_io(path))?;
    write_reply(&mut stream, format!("{line}\n").as_bytes())
        .await
        .map_err(client_io(path))?;
    stream.shutdown().await.map_err(client_io(path))
}
