//! Single-instance coordination over a Unix domain socket.
//!
//! The first instance binds the rendezvous socket and becomes the primary.
//! Later invocations connect to it, forward the file they were started with
//! as `"<cwd>||<file>"` and exit. A message is terminated by EOF and holds at
//! most [`MAX_REQUEST_LEN`] bytes.
//!
//! Deciding who becomes primary is serialized by an exclusive `flock` on a
//! lock file next to the socket. The primary holds it for its whole life, so
//! a socket file found by the lock holder is always stale.

use crate::error::GatewayError;
use crate::shell::{OwnerEvent, OwnerHandle};
use nix::errno::Errno;
use nix::fcntl::{flock, FlockArg};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, trace, warn};

pub const MAX_REQUEST_LEN: u64 = 1024;
pub const SEPARATOR: &str = "||";

/// How long a secondary waits for the lock holder to start listening.
const LISTEN_PATIENCE: Duration = Duration::from_secs(3);
const RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// A file handed from a secondary invocation to the primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRequest {
    /// Working directory of the secondary invocation.
    pub cwd: PathBuf,
    /// The file as given on its command line, relative to `cwd` or absolute.
    pub file: String,
}

impl ForwardRequest {
    pub fn new(cwd: impl Into<PathBuf>, file: impl Into<String>) -> Self {
        Self {
            cwd: cwd.into(),
            file: file.into(),
        }
    }

    pub fn encode(&self) -> String {
        format!("{}{}{}", self.cwd.display(), SEPARATOR, self.file)
    }
}

/// Outcome of [`claim`].
#[derive(Debug)]
pub enum Claim {
    /// Another instance is running and has been handed the request.
    Forwarded,
    /// This process is the primary instance.
    Primary(GatewayServer),
}

/// Becomes the primary instance, or forwards `forward` to the existing one.
///
/// Of any number of concurrent callers for the same socket exactly one
/// becomes primary.
pub async fn claim(socket_path: &Path, forward: Option<&ForwardRequest>) -> Result<Claim, GatewayError> {
    let lock_path = lock_path_for(socket_path);
    let lock = open_lock(&lock_path)?;
    let deadline = Instant::now() + LISTEN_PATIENCE;
    loop {
        if try_lock(&lock, &lock_path)? {
            debug!(path = %socket_path.display(), "No running instance, becoming primary");
            return GatewayServer::bind(socket_path, lock).map(Claim::Primary);
        }
        // The holder is the primary, or about to become it.
        match UnixStream::connect(socket_path).await {
            Ok(stream) => return hand_over(stream, forward).await,
            Err(source) if Instant::now() >= deadline => {
                return Err(GatewayError::Unreachable {
                    path: socket_path.to_path_buf(),
                    source,
                })
            }
            Err(e) => {
                trace!(path = %socket_path.display(), "Primary not listening yet: {}", e);
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
        }
    }
}

async fn hand_over(mut stream: UnixStream, forward: Option<&ForwardRequest>) -> Result<Claim, GatewayError> {
    if let Some(request) = forward {
        stream.write_all(request.encode().as_bytes()).await?;
        info!(file = %request.file, "Forwarded request to the running instance");
    } else {
        info!("Another instance is already running");
    }
    stream.shutdown().await?;
    Ok(Claim::Forwarded)
}

/// `<socket>.lock`
fn lock_path_for(socket_path: &Path) -> PathBuf {
    let mut name = OsString::from(socket_path.as_os_str());
    name.push(".lock");
    PathBuf::from(name)
}

fn open_lock(lock_path: &Path) -> Result<File, GatewayError> {
    let bind_error = |source| GatewayError::Bind {
        path: lock_path.to_path_buf(),
        source,
    };
    if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(bind_error)?;
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
        .map_err(bind_error)
}

/// Takes the exclusive lock without blocking. `false` if another open file holds it.
fn try_lock(lock: &File, lock_path: &Path) -> Result<bool, GatewayError> {
    match flock(lock.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(()) => Ok(true),
        Err(e) if e == Errno::EWOULDBLOCK => Ok(false),
        Err(source) => Err(GatewayError::Lock {
            path: lock_path.to_path_buf(),
            source,
        }),
    }
}

/// The primary's end of the rendezvous socket. Dropping it removes the socket
/// file and then releases the lock.
#[derive(Debug)]
pub struct GatewayServer {
    listener: UnixListener,
    path: PathBuf,
    _lock: File,
}

impl GatewayServer {
    fn bind(path: &Path, lock: File) -> Result<Self, GatewayError> {
        let bind_error = |source| GatewayError::Bind {
            path: path.to_path_buf(),
            source,
        };
        match fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "Removed stale socket"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(bind_error(e)),
        }
        let listener = UnixListener::bind(path).map_err(bind_error)?;
        info!(path = %path.display(), "Listening for launch requests");
        Ok(Self {
            listener,
            path: path.to_path_buf(),
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accepts requests until the owner loop goes away.
    pub async fn serve(self, owner: OwnerHandle) {
        loop {
            match self.listener.accept().await {
                Ok((stream, _)) => {
                    tokio::spawn(handle_connection(stream, owner.clone()));
                }
                Err(e) => warn!("Failed to accept launch request: {}", e),
            }
            if owner.is_closed() {
                break;
            }
        }
    }
}

impl Drop for GatewayServer {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = fs::remove_file(&self.path) {
                error!("Failed to remove socket file {}: {}", self.path.display(), e);
            }
        }
    }
}

async fn handle_connection(stream: UnixStream, owner: OwnerHandle) {
    let mut raw = Vec::new();
    if let Err(e) = stream.take(MAX_REQUEST_LEN).read_to_end(&mut raw).await {
        warn!("Failed to read launch request: {}", e);
        return;
    }
    let message = String::from_utf8_lossy(&raw).into_owned();
    if message.is_empty() {
        debug!("Secondary instance connected without a file");
        return;
    }

    let resolved = match tokio::task::spawn_blocking(move || resolve_request(&message)).await {
        Ok(resolved) => resolved,
        Err(e) => {
            warn!("Launch request resolution task failed: {}", e);
            return;
        }
    };
    match resolved {
        Ok(paths) => {
            for path in paths {
                info!(path = %path.display(), "Received launch request");
                if owner.post(OwnerEvent::OpenFile(path)).is_err() {
                    break;
                }
            }
        }
        Err(e) => warn!("Dropping launch request: {}", e),
    }
}

/// Splits a request into working directory and file.
pub fn parse_request(message: &str) -> Result<(PathBuf, String), GatewayError> {
    let (cwd, file) = message
        .split_once(SEPARATOR)
        .ok_or_else(|| GatewayError::IpcMalformed(message.to_string()))?;
    if file.is_empty() {
        return Err(GatewayError::IpcMalformed(message.to_string()));
    }
    Ok((PathBuf::from(cwd), file.to_string()))
}

/// Resolves a request to the existing files it names.
///
/// The directory part of the file is joined onto the working directory; the
/// last component is a glob pattern.
pub fn resolve_request(message: &str) -> Result<Vec<PathBuf>, GatewayError> {
    let (cwd, file) = parse_request(message)?;
    let file = Path::new(&file);
    let name = file
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| GatewayError::IpcMalformed(message.to_string()))?;
    let directory = match file.parent() {
        Some(parent) => cwd.join(parent),
        None => cwd,
    };
    if !directory.is_dir() {
        return Err(GatewayError::ResolveDirectoryMissing(directory));
    }

    let pattern = format!("{}/{}", glob::Pattern::escape(&directory.to_string_lossy()), name);
    let matches: Vec<PathBuf> = glob::glob(&pattern)
        .map_err(|e| GatewayError::IpcMalformed(format!("{}: {}", message, e)))?
        .filter_map(Result::ok)
        .filter(|path| path.exists())
        .collect();
    if matches.is_empty() {
        return Err(GatewayError::NoMatch(directory.join(name)));
    }
    Ok(matches)
}
