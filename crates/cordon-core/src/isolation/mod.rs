//! Linux isolation primitives
//!
//! This module contains the isolation mechanisms:
//! - `clone3` - fork-like process creation straight into new namespaces
//! - `namespace` - user, network and pid namespaces for a new child
//! - `mounts` - filesystem root detachment (pivot_root or chroot)
//! - `seccomp` - no-new-privileges plus a default-deny syscall filter

pub mod clone3;
pub mod mounts;
pub mod namespace;
pub mod seccomp;

pub use self::mounts::{DetachStrategy, FilesystemDetacher};
pub use self::namespace::{ChildHandle, NamespaceFactory, NamespaceKind};
pub use self::seccomp::{SeccompProfile, SyscallPolicy, SyscallRestrictor};
