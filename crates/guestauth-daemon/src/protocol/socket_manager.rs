//! Listener topology: one public bootstrap socket plus per-user session
//! sockets.
//!
//! The public socket (mode 0666) only brokers sessions: a client asks for a
//! session and is told the path of a per-user socket. Per-user sockets are
//! created on demand, mode 0600 and chowned to their user, so the
//! filesystem already narrows who can even connect; peer credentials are
//! checked again at dispatch time.
//!
//! # Security Considerations
//!
//! - The socket directory must not be a symlink; bind refuses otherwise.
//! - Stale socket files are removed before binding; a non-socket file in
//!   the way is an error, never deleted.
//! - Socket modes are set after bind, before the path is handed to anyone.
//! - A connection-count semaphore bounds concurrent connections across all
//!   listeners.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use guestauth_core::alias::encode_username;
use guestauth_core::error::{ServiceError, ServiceResult};
use guestauth_core::securefile::resolve_user;
use nix::unistd::{chown, Uid};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use super::error::{ProtocolError, ProtocolResult};

/// Public bootstrap socket filename.
const PUBLIC_SOCKET_NAME: &str = "public.sock";

/// Public socket mode: anyone may connect to request a session.
const PUBLIC_SOCKET_MODE: u32 = 0o666;

/// Per-user socket mode: owner only.
const USER_SOCKET_MODE: u32 = 0o600;

/// Socket directory mode when created by the daemon.
const SOCKET_DIR_MODE: u32 = 0o755;

/// Depth of the accept channel between listener pumps and the accept loop.
const ACCEPT_QUEUE_DEPTH: usize = 64;

/// Which listener a connection arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketOwner {
    /// The public bootstrap socket.
    Public,
    /// The session socket belonging to the named user.
    User(String),
}

impl std::fmt::Display for SocketOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::User(user) => write!(f, "user:{user}"),
        }
    }
}

/// A connection handed to the accept loop.
pub struct AcceptedConnection {
    /// The raw stream.
    pub stream: UnixStream,
    /// The listener it arrived on.
    pub owner: SocketOwner,
    /// Held for the connection's lifetime to bound concurrency.
    pub permit: OwnedSemaphorePermit,
}

/// Per-user session socket filename.
#[must_use]
pub fn user_socket_name(user: &str) -> String {
    format!("user-{}.sock", encode_username(user))
}

fn set_socket_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

/// Remove a stale socket file; refuse to touch anything else.
fn cleanup_socket(path: &Path) -> io::Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) => {
            use std::os::unix::fs::FileTypeExt;
            if !meta.file_type().is_socket() {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} exists but is not a socket", path.display()),
                ));
            }
            std::fs::remove_file(path)?;
            debug!(path = %path.display(), "removed stale socket file");
            Ok(())
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn ensure_directory(path: &Path) -> io::Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) => {
            if meta.file_type().is_symlink() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "{} is a symlink, refusing to use as socket directory",
                        path.display()
                    ),
                ));
            }
            if !meta.is_dir() {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} exists but is not a directory", path.display()),
                ));
            }
            // Existing directory permissions are left alone.
            Ok(())
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            std::fs::create_dir_all(path)?;
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_DIR_MODE))
        },
        Err(e) => Err(e),
    }
}

/// Spawn a task that forwards accepted streams into the shared channel.
fn spawn_accept_pump(
    listener: UnixListener,
    owner: SocketOwner,
    tx: mpsc::Sender<(UnixStream, SocketOwner)>,
) {
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    if tx.send((stream, owner.clone())).await.is_err() {
                        // Accept loop is gone; daemon is shutting down.
                        break;
                    }
                },
                Err(e) => {
                    warn!(listener = %owner, error = %e, "accept failed");
                },
            }
        }
    });
}

/// Creates per-user session sockets on demand and remembers which exist.
///
/// Shared with the dispatcher so a `SessionRequest` can spin one up.
pub struct SessionRegistry {
    socket_dir: PathBuf,
    tx: mpsc::Sender<(UnixStream, SocketOwner)>,
    active: std::sync::Mutex<HashMap<String, PathBuf>>,
}

impl SessionRegistry {
    /// Bind (or reuse) the session socket for `user` and return its path.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NoSuchUser`] for unknown accounts and
    /// [`ServiceError::InternalFailure`] for bind problems.
    pub fn ensure_user_socket(&self, user: &str) -> ServiceResult<PathBuf> {
        let (uid, gid) = resolve_user(user)?;

        let mut active = self
            .active
            .lock()
            .map_err(|_| ServiceError::internal("session registry lock poisoned"))?;
        if let Some(path) = active.get(user) {
            return Ok(path.clone());
        }

        let path = self.socket_dir.join(user_socket_name(user));
        cleanup_socket(&path)
            .map_err(|e| ServiceError::internal(format!("stale socket cleanup: {e}")))?;
        let listener = UnixListener::bind(&path).map_err(|e| {
            ServiceError::internal(format!("cannot bind {}: {e}", path.display()))
        })?;
        set_socket_mode(&path, USER_SOCKET_MODE)
            .map_err(|e| ServiceError::internal(format!("socket mode: {e}")))?;
        if uid != Uid::effective() {
            chown(&path, Some(uid), Some(gid))
                .map_err(|e| ServiceError::internal(format!("socket chown: {e}")))?;
        }

        spawn_accept_pump(listener, SocketOwner::User(user.to_string()), self.tx.clone());
        info!(user, path = %path.display(), "session socket created");
        active.insert(user.to_string(), path.clone());
        Ok(path)
    }

    /// Paths of every live session socket.
    #[must_use]
    pub fn session_socket_paths(&self) -> Vec<PathBuf> {
        self.active
            .lock()
            .map(|active| active.values().cloned().collect())
            .unwrap_or_default()
    }
}

/// Binds the public socket and funnels every accepted connection, from any
/// listener, into one accept loop.
pub struct SocketManager {
    registry: Arc<SessionRegistry>,
    public_path: PathBuf,
    rx: mpsc::Receiver<(UnixStream, SocketOwner)>,
    semaphore: Arc<Semaphore>,
}

impl SocketManager {
    /// Create the socket directory if needed, bind the public socket, and
    /// start its accept pump.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory is unusable or the public
    /// socket cannot be bound.
    pub fn bind(socket_dir: &Path, max_connections: usize) -> ProtocolResult<Self> {
        ensure_directory(socket_dir)?;

        let public_path = socket_dir.join(PUBLIC_SOCKET_NAME);
        cleanup_socket(&public_path)?;
        let listener = UnixListener::bind(&public_path).map_err(|e| {
            ProtocolError::Io(io::Error::new(
                e.kind(),
                format!("cannot bind {}: {e}", public_path.display()),
            ))
        })?;
        set_socket_mode(&public_path, PUBLIC_SOCKET_MODE)?;

        let (tx, rx) = mpsc::channel(ACCEPT_QUEUE_DEPTH);
        spawn_accept_pump(listener, SocketOwner::Public, tx.clone());

        info!(
            public_socket = %public_path.display(),
            max_connections,
            "socket manager bound"
        );

        Ok(Self {
            registry: Arc::new(SessionRegistry {
                socket_dir: socket_dir.to_path_buf(),
                tx,
                active: std::sync::Mutex::new(HashMap::new()),
            }),
            public_path,
            rx,
            semaphore: Arc::new(Semaphore::new(max_connections)),
        })
    }

    /// The shared session-socket registry.
    #[must_use]
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// The public socket path.
    #[must_use]
    pub fn public_socket_path(&self) -> &Path {
        &self.public_path
    }

    /// Wait for the next connection from any listener.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::ConnectionClosed`] when every pump has
    /// stopped.
    pub async fn accept(&mut self) -> ProtocolResult<AcceptedConnection> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?;
        let (stream, owner) = self.rx.recv().await.ok_or(ProtocolError::ConnectionClosed)?;
        debug!(listener = %owner, "accepted connection");
        Ok(AcceptedConnection {
            stream,
            owner,
            permit,
        })
    }

    /// Remove the public and all session socket files.
    pub fn cleanup(&self) {
        if let Err(e) = std::fs::remove_file(&self.public_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.public_path.display(), error = %e, "socket cleanup failed");
            }
        }
        for path in self.registry.session_socket_paths() {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "socket cleanup failed");
                }
            }
        }
    }
}

impl Drop for SocketManager {
    fn drop(&mut self) {
        self.cleanup();
    }
}
