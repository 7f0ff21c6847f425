//! Run driver: resolves mode tokens and applies one primitive per token
//!
//! For each token: report identity, apply the primitive, then synchronize
//! if a child was created. A namespace child carries on with the remaining
//! tokens while its parent waits for it, so later tokens stack on top of
//! earlier ones in descendants. Any error ends the run; the remaining tokens
//! are never attempted.

use crate::config::ReportFormat;
use crate::identity::{HostIdentity, IdentitySource, ProcessIdentity};
use crate::isolation::{
    ChildHandle, FilesystemDetacher, NamespaceFactory, NamespaceKind, SyscallPolicy,
    SyscallRestrictor,
};
use crate::mode::USAGE;
use crate::wait::{SyncOutcome, Synchronizer};
use crate::{CordonConfig, CordonError, IsolationMode, Result};
use nix::unistd::{getpid, getppid};
use std::io::Write;

/// How a run ended in this process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every token was processed (or there were none)
    Completed,
    /// This process created a child and synchronized with it
    Synchronized(SyncOutcome),
}

impl RunOutcome {
    /// Exit status for this process
    #[must_use]
    pub const fn exit_status(&self) -> u8 {
        match self {
            Self::Completed => 0,
            Self::Synchronized(outcome) => outcome.exit_status(),
        }
    }
}

/// Result of applying one mode
enum Applied {
    /// A namespace child was created
    Spawned(ChildHandle),
    /// The primitive was applied to this process
    InPlace,
}

/// Resolve every token up front. Any unknown token rejects the whole run.
pub fn resolve_modes<T: AsRef<str>>(tokens: &[T]) -> Result<Vec<IsolationMode>> {
    tokens
        .iter()
        .map(|token| match IsolationMode::from_token(Some(token.as_ref())) {
            IsolationMode::Invalid => Err(CordonError::InvalidMode(format!(
                "unrecognized mode {:?}",
                token.as_ref()
            ))),
            mode => Ok(mode),
        })
        .collect()
}

pub struct Driver<S = HostIdentity, W = std::io::Stdout> {
    identity: S,
    out: W,
    format: ReportFormat,
    factory: NamespaceFactory,
    detacher: FilesystemDetacher,
    restrictor: SyscallRestrictor,
    synchronizer: Synchronizer,
}

impl Driver {
    /// Driver for the live process, reporting on stdout
    #[must_use]
    pub fn new(config: &CordonConfig) -> Self {
        Self::with_parts(config, HostIdentity, std::io::stdout())
    }
}

impl<S: IdentitySource, W: Write> Driver<S, W> {
    #[must_use]
    pub fn with_parts(config: &CordonConfig, identity: S, out: W) -> Self {
        Self {
            identity,
            out,
            format: config.report_format,
            factory: NamespaceFactory::new(config.map_user_ids),
            detacher: FilesystemDetacher::new(
                &config.detach_root,
                config.detach_strategy,
                config.root_size,
            ),
            restrictor: SyscallRestrictor::new(SyscallPolicy::for_profile(config.seccomp_profile)),
            synchronizer: Synchronizer::new(config.wait_timeout),
        }
    }

    /// Process `tokens` in order
    pub fn run<T: AsRef<str>>(&mut self, tokens: &[T]) -> Result<RunOutcome> {
        if tokens.is_empty() {
            writeln!(self.out, "{USAGE}")?;
            return Ok(RunOutcome::Completed);
        }

        let modes = match resolve_modes(tokens) {
            Ok(modes) => modes,
            Err(e) => {
                writeln!(self.out, "{USAGE}")?;
                return Err(e);
            }
        };

        for (step, mode) in modes.into_iter().enumerate() {
            tracing::info!(step = step + 1, %mode, "mode resolved");
            self.report(step + 1)?;

            match self.apply(mode)? {
                Applied::Spawned(ChildHandle::ChildView) => {
                    writeln!(self.out, "Child   - child pid {} parent pid {}", getpid(), getppid())?;
                }
                Applied::Spawned(ChildHandle::ParentView(child)) => {
                    writeln!(self.out, "Parent  - child pid {child} parent pid {}", getpid())?;
                    self.out.flush()?;
                    let outcome = self.synchronizer.wait(child)?;
                    writeln!(self.out, "{}", outcome.describe(getpid()))?;
                    self.out.flush()?;
                    return Ok(RunOutcome::Synchronized(outcome));
                }
                Applied::InPlace => {
                    let me = getpid();
                    writeln!(self.out, "Self    - pid {me} parent pid {}", getppid())?;
                    let outcome = self.synchronizer.wait(me)?;
                    writeln!(self.out, "{}", outcome.describe(me))?;
                }
            }
        }

        self.out.flush()?;
        Ok(RunOutcome::Completed)
    }

    fn report(&mut self, step: usize) -> Result<()> {
        let identity = ProcessIdentity::capture(&self.identity);
        writeln!(self.out, "\n{step}. Current")?;
        match self.format {
            ReportFormat::Text => writeln!(self.out, "{identity}")?,
            ReportFormat::Json => writeln!(self.out, "{}", identity.to_json()?)?,
        }
        Ok(())
    }

    fn apply(&mut self, mode: IsolationMode) -> Result<Applied> {
        // the child must not inherit unwritten report output
        self.out.flush()?;

        if let Some(kind) = NamespaceKind::for_mode(mode) {
            return Ok(Applied::Spawned(self.factory.spawn(kind)?));
        }

        match mode {
            IsolationMode::ChrootDetach => self.detacher.detach()?,
            IsolationMode::SeccompSandbox => {
                self.restrictor.apply()?;
            }
            _ => {
                return Err(CordonError::InvalidMode(format!(
                    "{mode} does not select a primitive"
                )));
            }
        }
        Ok(Applied::InPlace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::tests::FakeIdentity;
    use crate::isolation::DetachStrategy;

    fn driver(config: &CordonConfig) -> Driver<FakeIdentity, Vec<u8>> {
        Driver::with_parts(config, FakeIdentity::default(), Vec::new())
    }

    fn output(driver: &Driver<FakeIdentity, Vec<u8>>) -> String {
        String::from_utf8_lossy(&driver.out).into_owned()
    }

    #[test]
    fn test_resolve_modes() {
        let modes = resolve_modes(&["-user", "-chroot", "-seccomp"]).unwrap();
        assert_eq!(
            modes,
            vec![
                IsolationMode::UserNamespace,
                IsolationMode::ChrootDetach,
                IsolationMode::SeccompSandbox
            ]
        );
        assert!(matches!(
            resolve_modes(&["-pid", "-bogus"]),
            Err(CordonError::InvalidMode(_))
        ));
    }

    #[test]
    fn test_no_tokens_prints_usage() {
        let mut driver = driver(&CordonConfig::default());
        let outcome = driver.run::<&str>(&[]).unwrap();

        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(outcome.exit_status(), 0);
        assert!(output(&driver).contains(USAGE));
    }

    #[test]
    fn test_unknown_token_fails_before_any_primitive() {
        let mut driver = driver(&CordonConfig::default());
        let err = driver.run(&["-bogus"]).unwrap_err();

        assert!(matches!(err, CordonError::InvalidMode(_)));
        let out = output(&driver);
        assert!(out.contains(USAGE));
        assert!(!out.contains("Current"));
    }

    #[test]
    fn test_unknown_token_after_valid_one_still_rejected_up_front() {
        let mut driver = driver(&CordonConfig::default());
        let err = driver.run(&["-pid", "-bogus"]).unwrap_err();

        assert_eq!(err.step(), "mode selection");
        assert!(!output(&driver).contains("1. Current"));
    }

    #[test]
    fn test_failed_step_stops_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let config = CordonConfig::builder()
            .detach_root(blocker.join("root"))
            .detach_strategy(DetachStrategy::Chroot)
            .build();
        let mut driver = driver(&config);

        let err = driver.run(&["-chroot", "-pid"]).unwrap_err();
        assert!(matches!(err, CordonError::Detachment(_)));

        let out = output(&driver);
        assert!(out.contains("1. Current"));
        assert!(out.contains("pid  = 42"));
        assert!(!out.contains("2. Current"));
    }

    #[test]
    fn test_json_report() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let config = CordonConfig::builder()
            .detach_root(blocker.join("root"))
            .report_format(ReportFormat::Json)
            .build();
        let mut driver = driver(&config);

        assert!(driver.run(&["-chroot"]).is_err());
        assert!(output(&driver).contains("\"network_interfaces\": 3"));
    }
}
