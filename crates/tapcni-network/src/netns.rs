//! Network namespace handles.
//!
//! Namespace membership is a property of a thread, not of the process, so
//! every region that needs a namespace active runs on a dedicated OS thread
//! spawned for that region alone. The async runtime never sees a worker
//! whose namespace was switched underneath it.

#![allow(unsafe_code)]

use std::fs::File;
use std::future::Future;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::path::{Path, PathBuf};

use rustix::thread::{LinkNameSpaceType, move_into_link_name_space};
use tapcni_common::{TapError, TapResult};
use tokio::sync::oneshot;

/// Network namespace of the calling thread.
const THREAD_NETNS: &str = "/proc/thread-self/ns/net";

/// `statfs` magic of nsfs, where namespace handles live on modern kernels.
const NSFS_MAGIC: i64 = 0x6e73_6673;

/// `statfs` magic of procfs, where namespace handles lived before nsfs.
const PROC_SUPER_MAGIC: i64 = 0x9fa0;

/// Handle to a network namespace.
#[derive(Debug)]
pub struct NetNs {
    /// Path the namespace was opened from.
    path: PathBuf,
    /// Open namespace file, `None` once closed.
    file: Option<File>,
}

impl NetNs {
    /// Open the network namespace at `path`, e.g. `/var/run/netns/foo`
    /// or `/proc/<pid>/ns/net`.
    ///
    /// # Errors
    ///
    /// Returns [`TapError::Namespace`] if the path cannot be opened or
    /// does not refer to a namespace.
    pub fn open(path: impl AsRef<Path>) -> TapResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| namespace_error(path, format!("failed to open: {e}")))?;

        let stat = rustix::fs::fstatfs(&file)
            .map_err(|e| namespace_error(path, format!("failed to stat: {e}")))?;
        #[allow(clippy::unnecessary_cast, clippy::cast_possible_wrap)]
        let fs_type = stat.f_type as i64;
        if fs_type != NSFS_MAGIC && fs_type != PROC_SUPER_MAGIC {
            return Err(namespace_error(path, "not a network namespace"));
        }
        match namespace_type(&file) {
            Ok(kind) if kind != libc::CLONE_NEWNET => {
                return Err(namespace_error(path, "not a network namespace"));
            }
            Ok(_) => {}
            // Kernels before 4.11 lack NS_GET_NSTYPE; setns checks the type.
            Err(e) if e.raw_os_error() == Some(libc::ENOTTY) => {}
            Err(e) => {
                return Err(namespace_error(path, format!("failed to query namespace type: {e}")));
            }
        }

        tracing::debug!(path = %path.display(), "Opened network namespace");

        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
        })
    }

    /// Open the network namespace of the calling thread.
    ///
    /// # Errors
    ///
    /// Returns an error if `/proc` is not available.
    pub fn current() -> TapResult<Self> {
        Self::open(THREAD_NETNS)
    }

    /// Path the namespace was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    /// Raw namespace descriptor, for moving links into this namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle has been closed.
    pub fn as_fd(&self) -> TapResult<BorrowedFd<'_>> {
        self.file
            .as_ref()
            .map(AsFd::as_fd)
            .ok_or_else(|| namespace_error(&self.path, "handle is closed"))
    }

    /// Inode of the namespace, identical for handles to the same namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle has been closed.
    pub fn inode(&self) -> TapResult<u64> {
        let stat = rustix::fs::fstat(self.as_fd()?)
            .map_err(|e| namespace_error(&self.path, format!("failed to stat: {e}")))?;
        Ok(stat.st_ino)
    }

    /// Close the handle. Calling this more than once has no effect.
    pub fn close(&mut self) {
        if self.file.take().is_some() {
            tracing::trace!(path = %self.path.display(), "Closed network namespace");
        }
    }

    /// Run `f` with this namespace active.
    ///
    /// `f` executes on a freshly spawned thread that enters the namespace,
    /// runs `f`, switches back to its original namespace and exits.
    ///
    /// # Errors
    ///
    /// Returns [`TapError::Namespace`] if the namespace cannot be entered,
    /// otherwise whatever `f` returns.
    pub async fn run<F, T>(&self, f: F) -> TapResult<T>
    where
        F: FnOnce() -> TapResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let target = self
            .file
            .as_ref()
            .ok_or_else(|| namespace_error(&self.path, "handle is closed"))?
            .try_clone()
            .map_err(|e| namespace_error(&self.path, format!("failed to duplicate: {e}")))?;
        let path = self.path.clone();
        let (tx, rx) = oneshot::channel();

        std::thread::Builder::new()
            .name("netns-worker".to_string())
            .spawn(move || {
                let _ = tx.send(run_pinned(&path, &target, f));
            })
            .map_err(|e| namespace_error(&self.path, format!("failed to spawn worker: {e}")))?;

        rx.await
            .map_err(|_| namespace_error(&self.path, "worker exited without a result"))?
    }

    /// Run the future produced by `f` with this namespace active.
    ///
    /// The future is driven by a single-threaded runtime owned by the
    /// pinned worker, so sockets it opens (netlink in particular) belong
    /// to this namespace.
    ///
    /// # Errors
    ///
    /// Returns [`TapError::Namespace`] if the namespace cannot be entered,
    /// otherwise whatever the future resolves to.
    pub async fn run_async<F, Fut, T>(&self, f: F) -> TapResult<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = TapResult<T>>,
        T: Send + 'static,
    {
        let path = self.path.clone();
        self.run(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| namespace_error(&path, format!("failed to build runtime: {e}")))?;
            runtime.block_on(f())
        })
        .await
    }
}

fn run_pinned<F, T>(path: &Path, target: &File, f: F) -> TapResult<T>
where
    F: FnOnce() -> TapResult<T>,
{
    let previous = File::open(THREAD_NETNS)
        .map_err(|e| namespace_error(path, format!("failed to save current namespace: {e}")))?;

    move_into_link_name_space(target.as_fd(), Some(LinkNameSpaceType::Network))
        .map_err(|e| namespace_error(path, format!("setns failed: {e}")))?;
    tracing::trace!(path = %path.display(), "Entered network namespace");

    let result = f();

    // The worker exits right after this, so a failed restore cannot leak
    // the namespace into unrelated work.
    if let Err(e) = move_into_link_name_space(previous.as_fd(), Some(LinkNameSpaceType::Network))
    {
        tracing::error!(path = %path.display(), error = %e, "Failed to restore network namespace");
    } else {
        tracing::trace!(path = %path.display(), "Restored network namespace");
    }

    result
}

/// `CLONE_NEW*` constant of the namespace behind `file`.
fn namespace_type(file: &File) -> std::io::Result<libc::c_int> {
    let ret = unsafe { libc::ioctl(file.as_raw_fd(), libc::NS_GET_NSTYPE) };
    if ret < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(ret)
}

fn namespace_error(path: &Path, message: impl Into<String>) -> TapError {
    TapError::Namespace {
        path: path.display().to_string(),
        message: message.into(),
    }
}
