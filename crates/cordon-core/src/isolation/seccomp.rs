//! Seccomp-BPF syscall restriction
//!
//! Restriction is a one-way chain of capability types:
//!
//! ```text
//! Privileged --narrow()--> NoNewPrivs --install()--> Filtered
//! ```
//!
//! Each step consumes the previous value, so a filter can only be installed
//! after no-new-privileges is confirmed, and nothing hands back a wider
//! type. The kernel keeps both attributes for the life of the process and
//! its descendants.

use crate::{CordonError, Result};
use seccompiler::{BpfProgram, SeccompAction, SeccompFilter, SeccompRule, TargetArch};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named allow-list presets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeccompProfile {
    /// I/O on open descriptors, memory management, signals, exit and wait
    Baseline,
    /// Baseline plus what later identity reports need (credential queries,
    /// passwd/group lookups, interface enumeration)
    #[default]
    Diagnostic,
}

/// An ordered allow-list; everything else kills the process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyscallPolicy {
    allowed: Vec<i64>,
}

impl SyscallPolicy {
    /// Build from an explicit list. Duplicates are dropped, first
    /// occurrence keeps its position.
    #[must_use]
    pub fn new(syscalls: impl IntoIterator<Item = i64>) -> Self {
        let mut allowed = Vec::new();
        for nr in syscalls {
            if !allowed.contains(&nr) {
                allowed.push(nr);
            }
        }
        Self { allowed }
    }

    #[must_use]
    pub fn baseline() -> Self {
        Self::new(baseline_syscalls())
    }

    #[must_use]
    pub fn diagnostic() -> Self {
        Self::new(baseline_syscalls().into_iter().chain(diagnostic_syscalls()))
    }

    #[must_use]
    pub fn for_profile(profile: SeccompProfile) -> Self {
        match profile {
            SeccompProfile::Baseline => Self::baseline(),
            SeccompProfile::Diagnostic => Self::diagnostic(),
        }
    }

    #[must_use]
    pub fn allowed(&self) -> &[i64] {
        &self.allowed
    }

    #[must_use]
    pub fn allows(&self, nr: i64) -> bool {
        self.allowed.contains(&nr)
    }

    /// Compile for the architecture this binary runs on
    pub fn compile(&self) -> Result<CompiledPolicy> {
        let arch: TargetArch = std::env::consts::ARCH.try_into().map_err(|e| {
            CordonError::Restriction(format!(
                "unsupported architecture {}: {e}",
                std::env::consts::ARCH
            ))
        })?;
        self.compile_for(arch)
    }

    /// Compile for `arch`. The generated program kills on an architecture
    /// mismatch before looking at the syscall number.
    pub fn compile_for(&self, arch: TargetArch) -> Result<CompiledPolicy> {
        if self.allowed.is_empty() {
            return Err(CordonError::Restriction("empty allow-list".into()));
        }

        let rules: BTreeMap<i64, Vec<SeccompRule>> =
            self.allowed.iter().map(|&nr| (nr, Vec::new())).collect();

        let filter = SeccompFilter::new(
            rules,
            SeccompAction::KillProcess,
            SeccompAction::Allow,
            arch,
        )
        .map_err(|e| CordonError::Restriction(format!("failed to create filter: {e}")))?;

        let program: BpfProgram = filter
            .try_into()
            .map_err(|e| CordonError::Restriction(format!("failed to compile filter: {e}")))?;

        Ok(CompiledPolicy {
            program,
            syscalls: self.allowed.len(),
        })
    }
}

/// A policy compiled to BPF, ready to install
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    program: BpfProgram,
    syscalls: usize,
}

impl CompiledPolicy {
    #[must_use]
    pub fn program(&self) -> &BpfProgram {
        &self.program
    }

    /// Number of allowed syscalls
    #[must_use]
    pub const fn syscalls(&self) -> usize {
        self.syscalls
    }
}

/// Kernel operations the restrictor depends on
pub trait RestrictionBackend {
    /// Set PR_SET_NO_NEW_PRIVS
    fn set_no_new_privs(&self) -> Result<()>;
    /// Read PR_GET_NO_NEW_PRIVS
    fn no_new_privs(&self) -> Result<bool>;
    /// Attach a filter to the calling thread
    fn install_filter(&self, program: &BpfProgram) -> Result<()>;
}

/// The running kernel
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelBackend;

impl RestrictionBackend for KernelBackend {
    fn set_no_new_privs(&self) -> Result<()> {
        Ok(nix::sys::prctl::set_no_new_privs()?)
    }

    fn no_new_privs(&self) -> Result<bool> {
        Ok(nix::sys::prctl::get_no_new_privs()?)
    }

    fn install_filter(&self, program: &BpfProgram) -> Result<()> {
        seccompiler::apply_filter(program)
            .map_err(|e| CordonError::Restriction(format!("failed to apply seccomp filter: {e}")))
    }
}

/// The process may still gain privileges through exec
#[derive(Debug)]
pub struct Privileged {
    _private: (),
}

/// no-new-privileges is set and confirmed
#[derive(Debug)]
pub struct NoNewPrivs {
    _private: (),
}

/// A default-deny filter is installed on top of no-new-privileges
#[derive(Debug)]
pub struct Filtered {
    syscalls: usize,
}

impl Privileged {
    /// Start from the current, unrestricted state
    #[must_use]
    pub(crate) const fn assume() -> Self {
        Self { _private: () }
    }

    /// Irrevocably forbid privilege gain through setuid/setgid exec
    pub fn narrow<B: RestrictionBackend + ?Sized>(self, backend: &B) -> Result<NoNewPrivs> {
        backend.set_no_new_privs().map_err(|e| {
            CordonError::Restriction(format!("prctl(PR_SET_NO_NEW_PRIVS) failed: {e}"))
        })?;

        let active = backend.no_new_privs().map_err(|e| {
            CordonError::Restriction(format!("prctl(PR_GET_NO_NEW_PRIVS) failed: {e}"))
        })?;
        if !active {
            return Err(CordonError::Restriction(
                "no_new_privs not active after PR_SET_NO_NEW_PRIVS".into(),
            ));
        }

        tracing::debug!("no_new_privs set");
        Ok(NoNewPrivs { _private: () })
    }
}

impl NoNewPrivs {
    /// Install `policy`. Filters stack, so later ones can only narrow further.
    pub fn install<B: RestrictionBackend + ?Sized>(
        self,
        backend: &B,
        policy: &CompiledPolicy,
    ) -> Result<Filtered> {
        backend.install_filter(policy.program())?;
        tracing::debug!(syscalls = policy.syscalls(), "seccomp filter installed");
        Ok(Filtered {
            syscalls: policy.syscalls(),
        })
    }
}

impl Filtered {
    /// Number of allowed syscalls in the last installed filter
    #[must_use]
    pub const fn syscalls(&self) -> usize {
        self.syscalls
    }
}

/// Applies no-new-privileges and then a syscall allow-list to the current
/// process
#[derive(Debug, Clone)]
pub struct SyscallRestrictor<B = KernelBackend> {
    policy: SyscallPolicy,
    backend: B,
}

impl SyscallRestrictor<KernelBackend> {
    #[must_use]
    pub const fn new(policy: SyscallPolicy) -> Self {
        Self {
            policy,
            backend: KernelBackend,
        }
    }
}

impl<B: RestrictionBackend> SyscallRestrictor<B> {
    #[must_use]
    pub const fn with_backend(policy: SyscallPolicy, backend: B) -> Self {
        Self { policy, backend }
    }

    #[must_use]
    pub const fn policy(&self) -> &SyscallPolicy {
        &self.policy
    }

    /// Restrict the calling process
    ///
    /// The filter is compiled first so an unsupported architecture fails
    /// before anything irreversible happens. If no-new-privileges cannot be
    /// confirmed the filter is never installed.
    pub fn apply(&self) -> Result<Filtered> {
        tracing::info!(syscalls = self.policy.allowed().len(), "restricting syscalls");

        let compiled = self.policy.compile()?;
        let narrowed = Privileged::assume().narrow(&self.backend)?;
        let filtered = narrowed.install(&self.backend, &compiled)?;

        tracing::info!(syscalls = filtered.syscalls(), "seccomp filter applied");
        Ok(filtered)
    }
}

/// Syscalls any restricted cordon process needs to keep writing reports,
/// reap children and exit
fn baseline_syscalls() -> Vec<i64> {
    vec![
        libc::SYS_read,
        libc::SYS_write,
        libc::SYS_writev,
        libc::SYS_exit,
        libc::SYS_exit_group,
        libc::SYS_rt_sigreturn,
        libc::SYS_restart_syscall,
        libc::SYS_rt_sigaction,
        libc::SYS_rt_sigprocmask,
        libc::SYS_sigaltstack,
        libc::SYS_brk,
        libc::SYS_mmap,
        libc::SYS_munmap,
        libc::SYS_mremap,
        libc::SYS_mprotect,
        libc::SYS_madvise,
        libc::SYS_futex,
        libc::SYS_sched_yield,
        libc::SYS_clock_gettime,
        libc::SYS_clock_nanosleep,
        libc::SYS_getpid,
        libc::SYS_getppid,
        libc::SYS_gettid,
        libc::SYS_close,
        libc::SYS_wait4,
        libc::SYS_waitid,
    ]
}

/// Extra syscalls used by identity inspection and further restriction
fn diagnostic_syscalls() -> Vec<i64> {
    let mut syscalls = vec![
        // credentials
        libc::SYS_getuid,
        libc::SYS_geteuid,
        libc::SYS_getgid,
        libc::SYS_getegid,
        libc::SYS_getresuid,
        libc::SYS_getresgid,
        libc::SYS_setfsuid,
        libc::SYS_setfsgid,
        libc::SYS_capget,
        libc::SYS_prctl,
        libc::SYS_getcwd,
        // passwd/group lookups through nss
        libc::SYS_openat,
        libc::SYS_fstat,
        libc::SYS_newfstatat,
        libc::SYS_statx,
        libc::SYS_lseek,
        libc::SYS_pread64,
        libc::SYS_getdents64,
        libc::SYS_fcntl,
        libc::SYS_ioctl,
        libc::SYS_ppoll,
        libc::SYS_uname,
        // interface enumeration over netlink
        libc::SYS_socket,
        libc::SYS_connect,
        libc::SYS_bind,
        libc::SYS_getsockname,
        libc::SYS_setsockopt,
        libc::SYS_getsockopt,
        libc::SYS_sendto,
        libc::SYS_sendmsg,
        libc::SYS_recvfrom,
        libc::SYS_recvmsg,
        // a later -seccomp stacks a narrower filter
        libc::SYS_seccomp,
    ];

    #[cfg(target_arch = "x86_64")]
    syscalls.extend([
        libc::SYS_open,
        libc::SYS_stat,
        libc::SYS_lstat,
        libc::SYS_access,
        libc::SYS_poll,
        libc::SYS_readlink,
    ]);

    syscalls
}
