//! Setup pipe between a freshly cloned child and its parent
//!
//! The child blocks on the read end until the parent has finished the
//! namespace setup that must happen from outside (uid/gid maps). The parent
//! sends a single status byte; EOF without a byte means the parent gave up.

use crate::{CordonError, Result};
use std::io::{Read, Write};
use std::os::unix::io::FromRawFd;

const SETUP_OK: u8 = 1;
const SETUP_FAILED: u8 = 0;

/// Both ends of a setup pipe, before the process split
#[derive(Debug)]
pub struct SetupPipe {
    rx: std::fs::File,
    tx: std::fs::File,
}

impl SetupPipe {
    /// Create a new pipe
    pub fn new() -> Result<Self> {
        let (rx, tx) = create_pipe()?;
        Ok(Self { rx, tx })
    }

    /// Keep the parent's end; the read end is closed
    #[must_use]
    pub fn into_parent(self) -> SetupNotifier {
        SetupNotifier { tx: self.tx }
    }

    /// Keep the child's end; the write end is closed so a dead parent
    /// shows up as EOF
    #[must_use]
    pub fn into_child(self) -> SetupListener {
        SetupListener { rx: self.rx }
    }
}

/// Parent end: reports whether outside setup succeeded
#[derive(Debug)]
pub struct SetupNotifier {
    tx: std::fs::File,
}

impl SetupNotifier {
    /// Let the child continue
    pub fn release(mut self) -> Result<()> {
        self.tx.write_all(&[SETUP_OK])?;
        Ok(())
    }

    /// Tell the child setup failed
    pub fn abort(mut self) {
        // the child treats EOF the same way, so a failed write is harmless
        drop(self.tx.write_all(&[SETUP_FAILED]));
    }
}

/// Child end: waits for the parent's verdict
#[derive(Debug)]
pub struct SetupListener {
    rx: std::fs::File,
}

impl SetupListener {
    /// Block until the parent reports. Errors unless the parent released us.
    pub fn wait(mut self) -> Result<()> {
        let mut status = [SETUP_FAILED; 1];
        let n = self.rx.read(&mut status)?;

        match (n, status[0]) {
            (1, SETUP_OK) => Ok(()),
            (0, _) => Err(CordonError::NamespaceCreation(
                "parent closed setup pipe before releasing child".into(),
            )),
            _ => Err(CordonError::NamespaceCreation(
                "parent reported namespace setup failure".into(),
            )),
        }
    }
}

/// Create a pipe (returns read end, write end)
fn create_pipe() -> Result<(std::fs::File, std::fs::File)> {
    let mut fds = [0i32; 2];

    // SAFETY: pipe2 syscall
    let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };

    if ret != 0 {
        return Err(CordonError::Io(std::io::Error::last_os_error()));
    }

    // SAFETY: We just created these file descriptors
    let read_end = unsafe { std::fs::File::from_raw_fd(fds[0]) };
    let write_end = unsafe { std::fs::File::from_raw_fd(fds[1]) };

    Ok((read_end, write_end))
}
