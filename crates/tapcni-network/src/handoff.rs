//! Device descriptor handoff over Unix domain sockets.
//!
//! Protocol: the client connects, receives exactly one message whose
//! ancillary data carries one descriptor (`SCM_RIGHTS`), and the server
//! closes the connection. The message body is a single zero byte with no
//! meaning; Linux does not deliver ancillary data on stream sockets
//! without at least one byte of payload.

use std::future::Future;
use std::io::{self, IoSlice, IoSliceMut};
use std::mem::MaybeUninit;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::time::Duration;

use rustix::net::{
    RecvAncillaryBuffer, RecvAncillaryMessage, RecvFlags, SendAncillaryBuffer,
    SendAncillaryMessage, SendFlags, recvmsg, sendmsg,
};
use tapcni_common::{TapError, TapResult};
use tokio::io::Interest;
use tokio::net::{UnixListener, UnixStream};

/// Payload accompanying the descriptor.
const CARRIER: [u8; 1] = [0];

/// Pause after a failed `accept` so a persistent error does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Serves one device descriptor to every client that connects.
#[derive(Debug)]
pub struct HandoffServer<D> {
    /// Path to the socket.
    path: PathBuf,
    /// Unix listener.
    listener: UnixListener,
    /// Device whose descriptor is handed out.
    device: D,
}

impl<D: AsFd> HandoffServer<D> {
    /// Bind the handoff socket at `path`.
    ///
    /// A stale socket file at `path` is replaced and the parent directory
    /// is created if needed. Must be called within a tokio runtime.
    ///
    /// Errors name the device after the socket's file stem, matching the
    /// `<device>.sock` layout.
    ///
    /// # Errors
    ///
    /// Returns [`TapError::Provisioning`] if the socket cannot be bound.
    pub fn bind(path: &Path, device: D) -> TapResult<Self> {
        let bind_error = |message: String| TapError::Provisioning {
            device: path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default(),
            message,
        };

        if path.exists() {
            std::fs::remove_file(path)
                .map_err(|e| bind_error(format!("failed to remove stale socket {}: {e}", path.display())))?;
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| bind_error(format!("failed to create {}: {e}", parent.display())))?;
        }

        let listener = UnixListener::bind(path)
            .map_err(|e| bind_error(format!("failed to bind handoff socket {}: {e}", path.display())))?;

        tracing::info!(path = %path.display(), "Handoff socket listening");

        Ok(Self {
            path: path.to_path_buf(),
            listener,
            device,
        })
    }

    /// Get the socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections one at a time until `shutdown` resolves.
    ///
    /// Each client receives the device descriptor and is disconnected.
    /// Failures of a single client are logged and do not stop the loop.
    /// Returns the number of descriptors handed out.
    pub async fn serve<S>(&self, shutdown: S) -> u64
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut served = 0;

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!(path = %self.path.display(), served, "Handoff server stopping");
                    return served;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        match send_device(&stream, self.device.as_fd()).await {
                            Ok(()) => {
                                served += 1;
                                tracing::debug!(served, "Sent device descriptor");
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Failed to send device descriptor");
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept handoff connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }
    }
}

impl<D> Drop for HandoffServer<D> {
    fn drop(&mut self) {
        if self.path.exists() {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Send `fd` over a connected stream.
///
/// # Errors
///
/// Returns an error if `sendmsg` fails.
pub async fn send_device(stream: &UnixStream, fd: BorrowedFd<'_>) -> io::Result<()> {
    let fds = [fd];

    stream
        .async_io(Interest::WRITABLE, || {
            let mut space = [MaybeUninit::<u8>::uninit(); rustix::cmsg_space!(ScmRights(1))];
            let mut control = SendAncillaryBuffer::new(&mut space);
            if !control.push(SendAncillaryMessage::ScmRights(&fds)) {
                return Err(io::Error::other("ancillary buffer too small"));
            }
            sendmsg(
                stream,
                &[IoSlice::new(&CARRIER)],
                &mut control,
                SendFlags::NOSIGNAL,
            )
            .map_err(io::Error::from)
        })
        .await?;

    Ok(())
}

/// Connect to the handoff socket at `path` and receive one descriptor.
///
/// The connection is closed before returning.
///
/// # Errors
///
/// Returns an error if nothing listens at `path` or the server closes the
/// connection without sending a descriptor.
pub async fn receive_device(path: &Path) -> io::Result<OwnedFd> {
    let stream = UnixStream::connect(path).await?;

    let received = stream
        .async_io(Interest::READABLE, || {
            let mut space = [MaybeUninit::<u8>::uninit(); rustix::cmsg_space!(ScmRights(1))];
            let mut control = RecvAncillaryBuffer::new(&mut space);
            let mut buf = [0u8; CARRIER.len()];

            let msg = recvmsg(
                &stream,
                &mut [IoSliceMut::new(&mut buf)],
                &mut control,
                RecvFlags::CMSG_CLOEXEC,
            )?;

            let fd = control.drain().find_map(|message| match message {
                RecvAncillaryMessage::ScmRights(mut fds) => fds.next(),
                _ => None,
            });
            Ok((msg.bytes, fd))
        })
        .await?;

    match received {
        (_, Some(fd)) => {
            tracing::debug!(path = %path.display(), "Received device descriptor");
            Ok(fd)
        }
        (0, None) => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed without a descriptor",
        )),
        (_, None) => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "message carried no descriptor",
        )),
    }
}
