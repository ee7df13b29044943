use std::{
    fs::File,
    io::{self, Read, Write},
    os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd},
    path::{Path, PathBuf},
};

use nix::{
    errno::Errno,
    fcntl::{self, OFlag},
    sys::stat::Mode,
    unistd,
};

use crate::{
    config::{ChannelKind, ChannelPath},
    error::{BridgeError, Result},
};

/// An opened named FIFO, readable and writable through one descriptor.
///
/// The FIFO is opened `O_RDWR` so that opening never blocks waiting for a
/// peer. Reads block while the FIFO is empty and writes block while it is
/// full; there are no timeouts. Dropping the endpoint closes the
/// descriptor but leaves the FIFO on disk.
#[derive(Debug)]
pub struct ChannelEndpoint {
    kind: ChannelKind,
    path: PathBuf,
    file: File,
}

impl ChannelEndpoint {
    /// Ensure the `kind` FIFO under `root` exists and open it
    pub fn ensure(root: &ChannelPath, kind: ChannelKind, mode: u32) -> Result<Self> {
        ensure_channel(kind, &root.endpoint(kind), mode)
    }

    /// Which side of the pair this is
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Filesystem path of the FIFO
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Create the FIFO at `path` unless something already exists there, then
/// open it for reading and writing.
///
/// EEXIST from mkfifo is not an error. Any other mkfifo failure, and any
/// open failure, is returned with the raw errno.
pub fn ensure_channel(kind: ChannelKind, path: &Path, mode: u32) -> Result<ChannelEndpoint> {
    if path.as_os_str().is_empty() {
        return Err(BridgeError::InvalidArgument("channel path is empty"));
    }

    match unistd::mkfifo(path, Mode::from_bits_truncate(mode as libc::mode_t)) {
        Ok(()) => tracing::debug!("Created {} channel at {:?} (mode {:o})", kind, path, mode),
        Err(Errno::EEXIST) => tracing::debug!("Reusing existing {} channel at {:?}", kind, path),
        Err(errno) => {
            tracing::error!("mkfifo({:?}) failed, error {}", path, errno as i32);
            return Err(BridgeError::Create {
                kind,
                path: path.to_path_buf(),
                errno,
            });
        }
    }

    let fd = fcntl::open(path, OFlag::O_RDWR, Mode::empty()).map_err(|errno| {
        tracing::error!("open({:?}) failed, error {}", path, errno as i32);
        BridgeError::Open {
            kind,
            path: path.to_path_buf(),
            errno,
        }
    })?;

    // SAFETY: `fd` was just returned by a successful open(2) and nothing
    // else holds it, so the OwnedFd becomes its sole owner.
    let file = File::from(unsafe { OwnedFd::from_raw_fd(fd) });

    tracing::debug!("Opened {} channel {:?} as fd {}", kind, path, fd);

    Ok(ChannelEndpoint {
        kind,
        path: path.to_path_buf(),
        file,
    })
}

impl AsRawFd for ChannelEndpoint {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl AsFd for ChannelEndpoint {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl Read for ChannelEndpoint {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for ChannelEndpoint {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
