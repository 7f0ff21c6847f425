//! Command-line mode tokens

use std::fmt;

/// Usage line printed when no mode (or an unknown one) is given
pub const USAGE: &str = "Usage: cordon [OPTIONS] [-user|-network|-pid|-chroot|-seccomp]...";

/// Isolation mode selected by a single command-line token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationMode {
    /// Spawn a child in a new user namespace
    UserNamespace,
    /// Spawn a child in a new network namespace
    NetworkNamespace,
    /// Spawn a child in a new PID namespace
    PidNamespace,
    /// Re-root the current process's filesystem view
    ChrootDetach,
    /// Install a syscall allow-list on the current process
    SeccompSandbox,
    /// Absent or unrecognized token
    Invalid,
}

impl IsolationMode {
    /// Every mode that selects an isolation primitive
    pub const ALL: [Self; 5] = [
        Self::UserNamespace,
        Self::NetworkNamespace,
        Self::PidNamespace,
        Self::ChrootDetach,
        Self::SeccompSandbox,
    ];

    /// Resolve a token. Matching is exact and case-sensitive; anything
    /// else, including no token at all, is `Invalid`.
    #[must_use]
    pub fn from_token(token: Option<&str>) -> Self {
        match token {
            Some("-user") => Self::UserNamespace,
            Some("-network") => Self::NetworkNamespace,
            Some("-pid") => Self::PidNamespace,
            Some("-chroot") => Self::ChrootDetach,
            Some("-seccomp") => Self::SeccompSandbox,
            _ => Self::Invalid,
        }
    }

    /// The command-line token for this mode
    #[must_use]
    pub const fn token(self) -> Option<&'static str> {
        match self {
            Self::UserNamespace => Some("-user"),
            Self::NetworkNamespace => Some("-network"),
            Self::PidNamespace => Some("-pid"),
            Self::ChrootDetach => Some("-chroot"),
            Self::SeccompSandbox => Some("-seccomp"),
            Self::Invalid => None,
        }
    }

    /// Whether this mode produces a new child process
    #[must_use]
    pub const fn spawns_child(self) -> bool {
        matches!(
            self,
            Self::UserNamespace | Self::NetworkNamespace | Self::PidNamespace
        )
    }
}

impl fmt::Display for IsolationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UserNamespace => "user namespace",
            Self::NetworkNamespace => "network namespace",
            Self::PidNamespace => "pid namespace",
            Self::ChrootDetach => "chroot detach",
            Self::SeccompSandbox => "seccomp sandbox",
            Self::Invalid => "invalid",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_recognized_tokens() {
        assert_eq!(IsolationMode::from_token(Some("-user")), IsolationMode::UserNamespace);
        assert_eq!(IsolationMode::from_token(Some("-network")), IsolationMode::NetworkNamespace);
        assert_eq!(IsolationMode::from_token(Some("-pid")), IsolationMode::PidNamespace);
        assert_eq!(IsolationMode::from_token(Some("-chroot")), IsolationMode::ChrootDetach);
        assert_eq!(IsolationMode::from_token(Some("-seccomp")), IsolationMode::SeccompSandbox);
    }

    #[test]
    fn test_token_round_trips_for_every_mode() {
        let mut seen = HashSet::new();
        for mode in IsolationMode::ALL {
            let token = mode.token().unwrap();
            assert_eq!(IsolationMode::from_token(Some(token)), mode);
            assert!(seen.insert(token), "duplicate token {token}");
        }
        assert_eq!(IsolationMode::Invalid.token(), None);
    }

    #[test]
    fn test_everything_else_is_invalid() {
        for token in [
            "", "-", "user", "--user", "-USER", "-User", "-user ", " -user", "-bogus", "-pidx",
            "-net", "-chroot\0",
        ] {
            assert_eq!(
                IsolationMode::from_token(Some(token)),
                IsolationMode::Invalid,
                "{token:?}"
            );
        }
        assert_eq!(IsolationMode::from_token(None), IsolationMode::Invalid);
    }

    #[test]
    fn test_only_namespace_modes_spawn() {
        assert!(IsolationMode::UserNamespace.spawns_child());
        assert!(IsolationMode::NetworkNamespace.spawns_child());
        assert!(IsolationMode::PidNamespace.spawns_child());
        assert!(!IsolationMode::ChrootDetach.spawns_child());
        assert!(!IsolationMode::SeccompSandbox.spawns_child());
        assert!(!IsolationMode::Invalid.spawns_child());
    }
}
