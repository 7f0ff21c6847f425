//! Filesystem root detachment with pivot_root or chroot

use crate::{CordonError, Result};
use serde::{Deserialize, Serialize};
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Directories created inside a fresh root
const SKELETON: [&str; 4] = ["tmp", "proc", "dev", "home"];

/// Where the old root is parked during pivot_root, relative to the new root
const PUT_OLD: &str = ".old_root";

/// How the current process is moved onto its new root
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetachStrategy {
    /// Private mount namespace + tmpfs root + pivot_root; the old root is
    /// unmounted entirely
    #[default]
    PivotRoot,
    /// chroot into the prepared directory; no mounts involved
    Chroot,
}

/// Re-roots the calling process. No child is created.
#[derive(Debug, Clone)]
pub struct FilesystemDetacher {
    /// Directory that becomes `/`
    pub new_root: PathBuf,
    pub strategy: DetachStrategy,
    /// tmpfs size in bytes (pivot_root strategy only)
    pub root_size: u64,
}

impl FilesystemDetacher {
    #[must_use]
    pub fn new(new_root: impl Into<PathBuf>, strategy: DetachStrategy, root_size: u64) -> Self {
        Self {
            new_root: new_root.into(),
            strategy,
            root_size,
        }
    }

    /// Detach the current process from the host filesystem
    ///
    /// Steps run in order and stop at the first failure, which is returned
    /// as `Detachment` naming the step. Completed steps are not rolled back.
    pub fn detach(&self) -> Result<()> {
        tracing::info!(root = ?self.new_root, strategy = ?self.strategy, "detaching filesystem");

        self.prepare_root()?;
        match self.strategy {
            DetachStrategy::PivotRoot => self.pivot()?,
            DetachStrategy::Chroot => self.chroot()?,
        }

        tracing::info!("filesystem detached");
        Ok(())
    }

    /// Create the new root directory if needed
    pub fn prepare_root(&self) -> Result<()> {
        if self.new_root.as_os_str().is_empty() || self.new_root == Path::new("/") {
            return Err(CordonError::Detachment(format!(
                "refusing to use {:?} as new root",
                self.new_root
            )));
        }

        std::fs::create_dir_all(&self.new_root).map_err(|e| {
            CordonError::Detachment(format!(
                "failed to create new root {}: {e}",
                self.new_root.display()
            ))
        })?;

        if self.strategy == DetachStrategy::Chroot {
            create_skeleton(&self.new_root)?;
        }
        Ok(())
    }

    fn pivot(&self) -> Result<()> {
        // Mounts below must not leak back into the host namespace
        nix::sched::unshare(nix::sched::CloneFlags::CLONE_NEWNS).map_err(|e| {
            CordonError::Detachment(format!("failed to unshare mount namespace: {e}"))
        })?;
        make_private(Path::new("/"))?;

        mount_tmpfs(&self.new_root, self.root_size)?;
        create_skeleton(&self.new_root)?;

        let put_old = self.new_root.join(PUT_OLD);
        std::fs::create_dir_all(&put_old)
            .map_err(|e| CordonError::Detachment(format!("failed to create put_old: {e}")))?;

        pivot_root(&self.new_root, &put_old)?;

        // Change to new root
        std::env::set_current_dir("/")
            .map_err(|e| CordonError::Detachment(format!("failed to chdir to /: {e}")))?;

        // Unmount old root
        let old = Path::new("/").join(PUT_OLD);
        umount2(&old, libc::MNT_DETACH)?;

        std::fs::remove_dir(&old)
            .map_err(|e| CordonError::Detachment(format!("failed to remove put_old: {e}")))?;

        Ok(())
    }

    fn chroot(&self) -> Result<()> {
        nix::unistd::chroot(&self.new_root).map_err(|e| {
            CordonError::Detachment(format!(
                "chroot to {} failed: {e}",
                self.new_root.display()
            ))
        })?;

        // Without this the old cwd stays reachable through relative paths
        std::env::set_current_dir("/")
            .map_err(|e| CordonError::Detachment(format!("failed to chdir to /: {e}")))?;

        Ok(())
    }
}

fn create_skeleton(root: &Path) -> Result<()> {
    for dir in SKELETON {
        let path = root.join(dir);
        std::fs::create_dir_all(&path)
            .map_err(|e| CordonError::Detachment(format!("failed to create {dir}: {e}")))?;
    }
    Ok(())
}

// Helper functions for mount operations

fn path_to_cstring(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|e| CordonError::Detachment(format!("invalid path {}: {e}", path.display())))
}

fn make_private(path: &Path) -> Result<()> {
    let path_c = path_to_cstring(path)?;

    // SAFETY: mount syscall changing propagation only
    let ret = unsafe {
        libc::mount(
            std::ptr::null(),
            path_c.as_ptr(),
            std::ptr::null(),
            libc::MS_REC | libc::MS_PRIVATE,
            std::ptr::null(),
        )
    };

    if ret != 0 {
        return Err(CordonError::Detachment(format!(
            "failed to make {} private: {}",
            path.display(),
            std::io::Error::last_os_error()
        )));
    }

    Ok(())
}

fn mount_tmpfs(path: &Path, size: u64) -> Result<()> {
    let path_c = path_to_cstring(path)?;
    let fstype = CString::new("tmpfs")
        .map_err(|e| CordonError::Detachment(format!("invalid fstype: {e}")))?;

    let size_mb = (size / (1024 * 1024)).max(1);
    let options = CString::new(format!("size={size_mb}M,mode=0755"))
        .map_err(|e| CordonError::Detachment(format!("invalid options: {e}")))?;

    // SAFETY: mount syscall with tmpfs
    let ret = unsafe {
        libc::mount(
            fstype.as_ptr(),
            path_c.as_ptr(),
            fstype.as_ptr(),
            libc::MS_NOSUID | libc::MS_NODEV,
            options.as_ptr().cast::<libc::c_void>(),
        )
    };

    if ret != 0 {
        return Err(CordonError::Detachment(format!(
            "failed to mount tmpfs at {}: {}",
            path.display(),
            std::io::Error::last_os_error()
        )));
    }

    Ok(())
}

fn pivot_root(new_root: &Path, put_old: &Path) -> Result<()> {
    let new_root_c = path_to_cstring(new_root)?;
    let put_old_c = path_to_cstring(put_old)?;

    // SAFETY: pivot_root syscall
    let ret = unsafe {
        libc::syscall(
            libc::SYS_pivot_root,
            new_root_c.as_ptr(),
            put_old_c.as_ptr(),
        )
    };

    if ret != 0 {
        return Err(CordonError::Detachment(format!(
            "pivot_root failed: {}",
            std::io::Error::last_os_error()
        )));
    }

    Ok(())
}

fn umount2(path: &Path, flags: i32) -> Result<()> {
    let path_c = path_to_cstring(path)?;

    // SAFETY: umount2 syscall
    let ret = unsafe { libc::umount2(path_c.as_ptr(), flags) };

    if ret != 0 {
        return Err(CordonError::Detachment(format!(
            "umount2 failed for {}: {}",
            path.display(),
            std::io::Error::last_os_error()
        )));
    }

    Ok(())
}
