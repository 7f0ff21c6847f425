//! Linux namespace isolation
//!
//! A namespace of these kinds cannot be joined after the fact, so creation
//! is tied to process creation: the child is cloned straight into the new
//! namespace and the parent keeps its own.

use super::clone3::fork_into;
use crate::pipe::SetupPipe;
use crate::{CordonError, IsolationMode, Result};
use nix::sched::CloneFlags;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::waitpid;
use nix::unistd::{Gid, Pid, Uid};
use std::fmt;

/// Namespace kinds that get a fresh instance per child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceKind {
    User,
    Network,
    Pid,
}

impl NamespaceKind {
    /// Convert to nix CloneFlags
    #[must_use]
    pub const fn clone_flag(self) -> CloneFlags {
        match self {
            Self::User => CloneFlags::CLONE_NEWUSER,
            Self::Network => CloneFlags::CLONE_NEWNET,
            Self::Pid => CloneFlags::CLONE_NEWPID,
        }
    }

    /// The namespace a mode asks for, if any
    #[must_use]
    pub const fn for_mode(mode: IsolationMode) -> Option<Self> {
        match mode {
            IsolationMode::UserNamespace => Some(Self::User),
            IsolationMode::NetworkNamespace => Some(Self::Network),
            IsolationMode::PidNamespace => Some(Self::Pid),
            _ => None,
        }
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::User => "user",
            Self::Network => "network",
            Self::Pid => "pid",
        })
    }
}

/// Result of a process split, as seen from one side of it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum ChildHandle {
    /// We are the parent; this is the child's pid (always > 0)
    ParentView(Pid),
    /// We are the new child
    ChildView,
}

impl ChildHandle {
    #[must_use]
    pub const fn is_child(&self) -> bool {
        matches!(self, Self::ChildView)
    }

    /// The child's pid, only known on the parent side
    #[must_use]
    pub const fn child_pid(&self) -> Option<Pid> {
        match self {
            Self::ParentView(pid) => Some(*pid),
            Self::ChildView => None,
        }
    }
}

/// Creates children inside new namespaces
#[derive(Debug, Clone)]
pub struct NamespaceFactory {
    /// Map the caller's ids to root inside new user namespaces
    map_user_ids: bool,
}

impl Default for NamespaceFactory {
    fn default() -> Self {
        Self { map_user_ids: true }
    }
}

impl NamespaceFactory {
    #[must_use]
    pub const fn new(map_user_ids: bool) -> Self {
        Self { map_user_ids }
    }

    /// Create a child process in a fresh namespace of `kind`
    ///
    /// Returns `ParentView` in the caller and `ChildView` in the child.
    /// On error no child is left running.
    pub fn spawn(&self, kind: NamespaceKind) -> Result<ChildHandle> {
        tracing::info!(%kind, "creating namespace");

        let handle = if kind == NamespaceKind::User && self.map_user_ids {
            spawn_mapped_user()?
        } else {
            fork_into(kind.clone_flag())?
        };

        if let ChildHandle::ParentView(pid) = handle {
            tracing::debug!(%kind, child = pid.as_raw(), "child created");
        }
        Ok(handle)
    }
}

/// Clone into a new user namespace and map our uid/gid to 0 inside it
/// before letting the child run on.
fn spawn_mapped_user() -> Result<ChildHandle> {
    let uid = nix::unistd::getuid();
    let gid = nix::unistd::getgid();
    let pipe = SetupPipe::new()?;

    match fork_into(CloneFlags::CLONE_NEWUSER)? {
        ChildHandle::ChildView => {
            pipe.into_child().wait()?;
            Ok(ChildHandle::ChildView)
        }
        ChildHandle::ParentView(pid) => {
            let notifier = pipe.into_parent();
            let mapped = write_id_maps(pid, uid, gid);
            let outcome = match mapped {
                Ok(()) => notifier.release(),
                Err(e) => {
                    notifier.abort();
                    Err(e)
                }
            };

            if let Err(e) = outcome {
                discard_child(pid);
                return Err(e);
            }
            Ok(ChildHandle::ParentView(pid))
        }
    }
}

/// Kill and reap a child whose setup failed
fn discard_child(pid: Pid) {
    if let Err(errno) = kill(pid, Signal::SIGKILL) {
        tracing::warn!(child = pid.as_raw(), %errno, "failed to kill child");
    }
    if let Err(errno) = waitpid(pid, None) {
        tracing::warn!(child = pid.as_raw(), %errno, "failed to reap child");
    }
}

/// Write uid_map, setgroups and gid_map for a child in a new user namespace
pub fn write_id_maps(child: Pid, uid: Uid, gid: Gid) -> Result<()> {
    let pid = child.as_raw();

    // Map uid 0 inside the namespace to our uid outside
    let uid_map = format!("0 {uid} 1\n");
    std::fs::write(format!("/proc/{pid}/uid_map"), &uid_map).map_err(|e| {
        CordonError::NamespaceCreation(format!("failed to write uid_map for pid {pid}: {e}"))
    })?;

    // Unprivileged writers must deny setgroups before gid_map
    std::fs::write(format!("/proc/{pid}/setgroups"), "deny\n").map_err(|e| {
        CordonError::NamespaceCreation(format!("failed to write setgroups for pid {pid}: {e}"))
    })?;

    let gid_map = format!("0 {gid} 1\n");
    std::fs::write(format!("/proc/{pid}/gid_map"), &gid_map).map_err(|e| {
        CordonError::NamespaceCreation(format!("failed to write gid_map for pid {pid}: {e}"))
    })?;

    tracing::debug!(pid, %uid, %gid, "user namespace ids mapped");
    Ok(())
}
