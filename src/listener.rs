use crate::config::{SocketConfig, Transport};
use anyhow::Context;
use std::fmt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio::net::{TcpListener, UnixListener};

/// A listening socket ready to be handed to the milter engine.
pub enum BoundListener {
    Unix {
        listener: UnixListener,
        socket_file: SocketFile,
    },
    Tcp(TcpListener),
}

/// Removes the UNIX socket file when dropped.
#[derive(Debug)]
pub struct SocketFile {
    path: PathBuf,
}

impl SocketFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SocketFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            log::warn!("Failed to remove socket {}: {}", self.path.display(), e);
        } else {
            log::debug!("Removed socket {}", self.path.display());
        }
    }
}

impl fmt::Display for BoundListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundListener::Unix { socket_file, .. } => {
                write!(f, "unix:{}", socket_file.path().display())
            }
            BoundListener::Tcp(listener) => match listener.local_addr() {
                Ok(addr) => write!(f, "tcp:{addr}"),
                Err(_) => f.write_str("tcp:<unknown>"),
            },
        }
    }
}

pub async fn bind(socket: &SocketConfig) -> anyhow::Result<BoundListener> {
    match socket.proto {
        Transport::Unix => bind_unix(Path::new(&socket.addr), socket.mode_bits()?),
        Transport::Tcp => {
            let listener = TcpListener::bind(socket.addr.as_str())
                .await
                .with_context(|| format!("Failed to bind TCP address {}", socket.addr))?;
            Ok(BoundListener::Tcp(listener))
        }
    }
}

fn bind_unix(path: &Path, mode: u32) -> anyhow::Result<BoundListener> {
    // Remove a socket left behind by a previous run
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove stale socket {}", path.display()))?;
    }

    let listener = UnixListener::bind(path)
        .with_context(|| format!("Failed to bind UNIX socket {}", path.display()))?;
    let socket_file = SocketFile {
        path: path.to_path_buf(),
    };

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .with_context(|| format!("Failed to set mode {:o} on {}", mode, path.display()))?;

    Ok(BoundListener::Unix {
        listener,
        socket_file,
    })
}
