//! Process identity inspection
//!
//! Reads the calling process's credentials, working directory and network
//! view through an [`IdentitySource`], so the same report can be produced
//! against the live process or a fixed snapshot in tests. Lookup failures
//! are never fatal: the affected fields are reported as unavailable.

use crate::Result;
use nix::unistd::{Gid, Group, Uid, User};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Sentinel passed to setfsuid/setfsgid. The kernel rejects it without
/// changing anything and still returns the previous id. Older kernels
/// differ in edge cases, so this is a best-effort query.
const FS_ID_QUERY: u32 = u32::MAX;

/// Real, effective and saved ids as returned by getresuid/getresgid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdTriple {
    pub real: u32,
    pub effective: u32,
    pub saved: u32,
}

/// Read-only view of the ambient process state
pub trait IdentitySource {
    fn pid(&self) -> i32;
    fn ppid(&self) -> i32;
    fn user_ids(&self) -> Result<IdTriple>;
    fn group_ids(&self) -> Result<IdTriple>;
    fn fs_uid(&self) -> u32;
    fn fs_gid(&self) -> u32;
    fn cwd(&self) -> Result<PathBuf>;
    /// `None` when the id has no passwd entry
    fn user_name(&self, uid: u32) -> Option<String>;
    /// `None` when the id has no group entry
    fn group_name(&self, gid: u32) -> Option<String>;
    fn interface_count(&self) -> Result<usize>;
    fn capabilities(&self) -> Result<Vec<String>>;
    fn no_new_privs(&self) -> Result<bool>;
}

/// The running process
#[derive(Debug, Clone, Copy, Default)]
pub struct HostIdentity;

impl IdentitySource for HostIdentity {
    fn pid(&self) -> i32 {
        nix::unistd::getpid().as_raw()
    }

    fn ppid(&self) -> i32 {
        nix::unistd::getppid().as_raw()
    }

    fn user_ids(&self) -> Result<IdTriple> {
        let ids = nix::unistd::getresuid()?;
        Ok(IdTriple {
            real: ids.real.as_raw(),
            effective: ids.effective.as_raw(),
            saved: ids.saved.as_raw(),
        })
    }

    fn group_ids(&self) -> Result<IdTriple> {
        let ids = nix::unistd::getresgid()?;
        Ok(IdTriple {
            real: ids.real.as_raw(),
            effective: ids.effective.as_raw(),
            saved: ids.saved.as_raw(),
        })
    }

    fn fs_uid(&self) -> u32 {
        nix::unistd::setfsuid(Uid::from_raw(FS_ID_QUERY)).as_raw()
    }

    fn fs_gid(&self) -> u32 {
        nix::unistd::setfsgid(Gid::from_raw(FS_ID_QUERY)).as_raw()
    }

    fn cwd(&self) -> Result<PathBuf> {
        Ok(nix::unistd::getcwd()?)
    }

    fn user_name(&self, uid: u32) -> Option<String> {
        match User::from_uid(Uid::from_raw(uid)) {
            Ok(user) => user.map(|u| u.name),
            Err(e) => {
                tracing::debug!(uid, error = %e, "passwd lookup failed");
                None
            }
        }
    }

    fn group_name(&self, gid: u32) -> Option<String> {
        match Group::from_gid(Gid::from_raw(gid)) {
            Ok(group) => group.map(|g| g.name),
            Err(e) => {
                tracing::debug!(gid, error = %e, "group lookup failed");
                None
            }
        }
    }

    fn interface_count(&self) -> Result<usize> {
        // one entry per (interface, address family) pair
        Ok(nix::ifaddrs::getifaddrs()?.count())
    }

    fn capabilities(&self) -> Result<Vec<String>> {
        let set = caps::read(None, caps::CapSet::Effective)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let mut names: Vec<String> = set.iter().map(|c| c.to_string().to_lowercase()).collect();
        names.sort();
        Ok(names)
    }

    fn no_new_privs(&self) -> Result<bool> {
        Ok(nix::sys::prctl::get_no_new_privs()?)
    }
}

/// An id together with its display name, if one resolves
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedId {
    pub id: u32,
    pub name: Option<String>,
}

/// Real, effective and saved ids with names
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdSet {
    pub real: NamedId,
    pub effective: NamedId,
    pub saved: NamedId,
}

/// Snapshot of a process's identity and privilege state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessIdentity {
    pub pid: i32,
    pub ppid: i32,
    /// `None` when getresuid failed
    pub uid: Option<IdSet>,
    /// `None` when getresgid failed
    pub gid: Option<IdSet>,
    pub fs_uid: NamedId,
    pub fs_gid: NamedId,
    pub cwd: Option<PathBuf>,
    pub network_interfaces: usize,
    pub capabilities: Option<Vec<String>>,
    pub no_new_privs: Option<bool>,
}

impl ProcessIdentity {
    /// Take a snapshot from `source`
    pub fn capture<S: IdentitySource + ?Sized>(source: &S) -> Self {
        let user = |id: u32| NamedId { id, name: source.user_name(id) };
        let group = |id: u32| NamedId { id, name: source.group_name(id) };

        let uid = match source.user_ids() {
            Ok(ids) => Some(IdSet {
                real: user(ids.real),
                effective: user(ids.effective),
                saved: user(ids.saved),
            }),
            Err(e) => {
                tracing::warn!(error = %e, "getresuid failed");
                None
            }
        };

        let gid = match source.group_ids() {
            Ok(ids) => Some(IdSet {
                real: group(ids.real),
                effective: group(ids.effective),
                saved: group(ids.saved),
            }),
            Err(e) => {
                tracing::warn!(error = %e, "getresgid failed");
                None
            }
        };

        let cwd = source
            .cwd()
            .inspect_err(|e| tracing::warn!(error = %e, "getcwd failed"))
            .ok();

        let network_interfaces = source.interface_count().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "getifaddrs failed");
            0
        });

        let capabilities = source
            .capabilities()
            .inspect_err(|e| tracing::warn!(error = %e, "reading capabilities failed"))
            .ok();

        let no_new_privs = source
            .no_new_privs()
            .inspect_err(|e| tracing::warn!(error = %e, "PR_GET_NO_NEW_PRIVS failed"))
            .ok();

        Self {
            pid: source.pid(),
            ppid: source.ppid(),
            uid,
            gid,
            fs_uid: user(source.fs_uid()),
            fs_gid: group(source.fs_gid()),
            cwd,
            network_interfaces,
            capabilities,
            no_new_privs,
        }
    }

    /// Render as a JSON document
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

const RULE: &str = "--------------------------------------";
const UNAVAILABLE: &str = "unavailable";

struct NameOrNone<'a>(Option<&'a str>);

impl fmt::Display for NameOrNone<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.unwrap_or("(none)"))
    }
}

fn write_id(f: &mut fmt::Formatter<'_>, label: &str, id: &NamedId) -> fmt::Result {
    writeln!(f, "{label:<14}({}): {}", id.id, NameOrNone(id.name.as_deref()))
}

fn write_set(f: &mut fmt::Formatter<'_>, kind: &str, set: Option<&IdSet>) -> fmt::Result {
    match set {
        Some(set) => {
            write_id(f, &format!("{kind} real"), &set.real)?;
            write_id(f, &format!("{kind} effective"), &set.effective)?;
            write_id(f, &format!("{kind} saved"), &set.saved)
        }
        None => writeln!(f, "{kind} real/effective/saved: {UNAVAILABLE}"),
    }
}

impl fmt::Display for ProcessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{RULE}")?;
        writeln!(f, "pid  = {}", self.pid)?;
        writeln!(f, "ppid = {}", self.ppid)?;
        write_set(f, "UID", self.uid.as_ref())?;
        write_id(f, "UID fs", &self.fs_uid)?;
        write_set(f, "GID", self.gid.as_ref())?;
        write_id(f, "GID fs", &self.fs_gid)?;
        match &self.cwd {
            Some(cwd) => writeln!(f, "cwd  = {}", cwd.display())?,
            None => writeln!(f, "cwd  = {UNAVAILABLE}")?,
        }
        writeln!(f, "num of network interfaces: {}", self.network_interfaces)?;
        match self.no_new_privs {
            Some(nnp) => writeln!(f, "no_new_privs = {}", u8::from(nnp))?,
            None => writeln!(f, "no_new_privs = {UNAVAILABLE}")?,
        }
        match &self.capabilities {
            Some(caps) if caps.is_empty() => writeln!(f, "capabilities = (none)")?,
            Some(caps) => writeln!(f, "capabilities = {}", caps.join(","))?,
            None => writeln!(f, "capabilities = {UNAVAILABLE}")?,
        }
        write!(f, "{RULE}")
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::CordonError;

    /// Fixed snapshot with switchable failures
    #[derive(Debug, Clone)]
    pub(crate) struct FakeIdentity {
        pub ids_fail: bool,
        pub ifaddrs_fail: bool,
        pub cwd: Option<PathBuf>,
    }

    impl Default for FakeIdentity {
        fn default() -> Self {
            Self {
                ids_fail: false,
                ifaddrs_fail: false,
                cwd: Some(PathBuf::from("/home/alice")),
            }
        }
    }

    fn io_err() -> CordonError {
        CordonError::Io(std::io::Error::from_raw_os_error(libc::EPERM))
    }

    impl IdentitySource for FakeIdentity {
        fn pid(&self) -> i32 {
            42
        }
        fn ppid(&self) -> i32 {
            1
        }
        fn user_ids(&self) -> Result<IdTriple> {
            if self.ids_fail {
                return Err(io_err());
            }
            Ok(IdTriple { real: 1000, effective: 0, saved: 0 })
        }
        fn group_ids(&self) -> Result<IdTriple> {
            if self.ids_fail {
                return Err(io_err());
            }
            Ok(IdTriple { real: 1000, effective: 1000, saved: 1000 })
        }
        fn fs_uid(&self) -> u32 {
            0
        }
        fn fs_gid(&self) -> u32 {
            1000
        }
        fn cwd(&self) -> Result<PathBuf> {
            self.cwd.clone().ok_or_else(io_err)
        }
        fn user_name(&self, uid: u32) -> Option<String> {
            match uid {
                0 => Some("root".into()),
                1000 => Some("alice".into()),
                _ => None,
            }
        }
        fn group_name(&self, gid: u32) -> Option<String> {
            (gid == 1000).then(|| "staff".into())
        }
        fn interface_count(&self) -> Result<usize> {
            if self.ifaddrs_fail {
                return Err(io_err());
            }
            Ok(3)
        }
        fn capabilities(&self) -> Result<Vec<String>> {
            Ok(vec!["cap_setuid".into()])
        }
        fn no_new_privs(&self) -> Result<bool> {
            Ok(false)
        }
    }

    #[test]
    fn test_capture_resolves_names() {
        let identity = ProcessIdentity::capture(&FakeIdentity::default());
        let uid = identity.uid.as_ref().unwrap();

        assert_eq!(identity.pid, 42);
        assert_eq!(uid.real, NamedId { id: 1000, name: Some("alice".into()) });
        assert_eq!(uid.effective.name.as_deref(), Some("root"));
        assert_eq!(identity.fs_gid.name.as_deref(), Some("staff"));
        assert_eq!(identity.network_interfaces, 3);
        assert_eq!(identity.no_new_privs, Some(false));
    }

    #[test]
    fn test_failed_id_query_is_unavailable_not_fatal() {
        let source = FakeIdentity { ids_fail: true, ..FakeIdentity::default() };
        let identity = ProcessIdentity::capture(&source);

        assert!(identity.uid.is_none());
        assert!(identity.gid.is_none());
        // fs ids are queried separately and still present
        assert_eq!(identity.fs_uid.id, 0);

        let report = identity.to_string();
        assert!(report.contains("UID real/effective/saved: unavailable"));
        assert!(report.contains("GID real/effective/saved: unavailable"));
    }

    #[test]
    fn test_failed_interface_enumeration_counts_zero() {
        let source = FakeIdentity { ifaddrs_fail: true, ..FakeIdentity::default() };
        let identity = ProcessIdentity::capture(&source);
        assert_eq!(identity.network_interfaces, 0);
    }

    #[test]
    fn test_host_interface_count_counts_every_entry() {
        let Ok(entries) = nix::ifaddrs::getifaddrs() else {
            eprintln!("Skipping test: getifaddrs unavailable");
            return;
        };
        let expected = entries.count();

        assert_eq!(HostIdentity.interface_count().unwrap(), expected);
    }

    #[test]
    fn test_unknown_id_has_no_name() {
        let source = FakeIdentity::default();
        assert_eq!(source.group_name(0), None);

        let identity = ProcessIdentity::capture(&source);
        let gid = identity.gid.as_ref().unwrap();
        assert_eq!(gid.real.name.as_deref(), Some("staff"));
        assert!(identity.to_string().contains("GID fs        (1000): staff"));
    }

    #[test]
    fn test_report_layout() {
        let identity = ProcessIdentity::capture(&FakeIdentity { cwd: None, ..FakeIdentity::default() });
        let report = identity.to_string();
        let lines: Vec<&str> = report.lines().collect();

        assert_eq!(lines.first(), Some(&RULE));
        assert_eq!(lines.last(), Some(&RULE));
        assert!(lines.contains(&"pid  = 42"));
        assert!(lines.contains(&"UID real      (1000): alice"));
        assert!(lines.contains(&"UID effective (0): root"));
        assert!(lines.contains(&"cwd  = unavailable"));
        assert!(lines.contains(&"num of network interfaces: 3"));
        assert!(lines.contains(&"capabilities = cap_setuid"));
    }

    #[test]
    fn test_json_report() {
        let identity = ProcessIdentity::capture(&FakeIdentity::default());
        let value: serde_json::Value = serde_json::from_str(&identity.to_json().unwrap()).unwrap();

        assert_eq!(value["pid"], 42);
        assert_eq!(value["uid"]["real"]["name"], "alice");
        assert_eq!(value["cwd"], "/home/alice");
        assert_eq!(value["network_interfaces"], 3);
    }

    #[test]
    fn test_host_snapshot_matches_process() {
        let identity = ProcessIdentity::capture(&HostIdentity);
        assert_eq!(identity.pid, std::process::id() as i32);

        if let Some(uid) = identity.uid {
            assert_eq!(uid.real.id, nix::unistd::getuid().as_raw());
            assert_eq!(uid.effective.id, nix::unistd::geteuid().as_raw());
        }
        // querying the fs id must not change it
        assert_eq!(HostIdentity.fs_uid(), HostIdentity.fs_uid());
    }
}
