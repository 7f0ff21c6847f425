//! clone3 syscall wrapper for fork-like process creation into new namespaces

use super::namespace::ChildHandle;
use crate::{CordonError, Result};
use nix::sched::CloneFlags;
use nix::unistd::Pid;
use std::io::Write;

/// clone3 clone_args structure (from linux/sched.h)
#[repr(C)]
#[derive(Debug, Default)]
pub struct CloneArgs {
    /// Flags for the new process
    pub flags: u64,
    /// File descriptor for pidfd
    pub pidfd: u64,
    /// Pointer to child TID in child memory
    pub child_tid: u64,
    /// Pointer to child TID in parent memory
    pub parent_tid: u64,
    /// Signal to deliver on child termination
    pub exit_signal: u64,
    /// Stack pointer (0 = copy parent stack)
    pub stack: u64,
    /// Stack size (0 if using parent stack)
    pub stack_size: u64,
    /// TLS pointer
    pub tls: u64,
}

/// Wrapper around the clone3 syscall
///
/// # Safety
/// Splits the process like fork(2). The caller must be single-threaded and
/// the child must only run code that is safe after a fork.
pub unsafe fn clone3(args: &CloneArgs) -> Result<libc::c_long> {
    // SAFETY: Making clone3 syscall with valid args
    let ret = unsafe {
        libc::syscall(
            libc::SYS_clone3,
            std::ptr::from_ref::<CloneArgs>(args),
            std::mem::size_of::<CloneArgs>(),
        )
    };

    if ret == -1 {
        return Err(CordonError::NamespaceCreation(format!(
            "clone3 failed: {}",
            std::io::Error::last_os_error()
        )));
    }

    Ok(ret)
}

/// Split the process, placing the child in the namespaces named by `flags`
///
/// The parent stays where it is. Buffered stdio is flushed first so the
/// child does not replay it.
pub fn fork_into(flags: CloneFlags) -> Result<ChildHandle> {
    drop(std::io::stdout().flush());
    drop(std::io::stderr().flush());

    #[allow(clippy::cast_sign_loss)]
    let args = CloneArgs {
        flags: flags.bits() as u64,
        exit_signal: libc::SIGCHLD as u64,
        ..Default::default()
    };

    // SAFETY: cordon is single-threaded; the child continues the same
    // program with its own copy of the address space
    let ret = unsafe { clone3(&args)? };

    if ret == 0 {
        return Ok(ChildHandle::ChildView);
    }

    let pid = i32::try_from(ret)
        .map_err(|_| CordonError::NamespaceCreation(format!("clone3 returned bad pid {ret}")))?;
    Ok(ChildHandle::ParentView(Pid::from_raw(pid)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_args_layout() {
        // CLONE_ARGS_SIZE_VER0
        assert_eq!(std::mem::size_of::<CloneArgs>(), 64);
    }
}
