//! Process-Inheritance Layer (spec.md §4.1): encodes/decodes listening
//! FDs across `exec` via the environment, and detects whether the
//! current image is a cold start or a spawned successor.

use std::os::unix::io::RawFd;
use std::os::unix::process::CommandExt;
use std::path::Path;

use nix::fcntl::{fcntl, FcntlArg};
use nix::unistd::{close, dup2};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::environment::Environment;

const GRACEFUL_SUFFIX: &str = "_GRACEFUL";
const GRACEFUL_FDS_SUFFIX: &str = "_GRACEFUL_FDS";

/// First fd number listener inheritance uses, after stdin/stdout/stderr
/// (spec.md §6: "Inherited FDs: FDs 3..3+N-1").
const FIRST_INHERITED_FD: RawFd = 3;

/// The pair of environment variable names this image's envelope uses,
/// derived from the uppercased basename of `argv[0]` (spec.md §3).
#[derive(Debug, Clone)]
pub struct EnvelopeKeys {
    pub graceful: String,
    pub graceful_fds: String,
}

impl EnvelopeKeys {
    pub fn for_exe(exe_name: &str) -> Self {
        let base = exe_name.to_uppercase();
        Self {
            graceful: format!("{base}{GRACEFUL_SUFFIX}"),
            graceful_fds: format!("{base}{GRACEFUL_FDS_SUFFIX}"),
        }
    }

    fn current() -> Self {
        let argv0 = std::env::args().next().unwrap_or_default();
        let base = Path::new(&argv0)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(argv0);
        Self::for_exe(&base)
    }
}

/// Per-image state populated once at startup from the envelope and
/// immutable thereafter (spec.md §3 `ProcessGeneration`).
#[derive(Debug, Clone)]
pub struct ProcessGeneration {
    keys: EnvelopeKeys,
    is_graceful: bool,
    inherited_fds: Vec<RawFd>,
}

impl ProcessGeneration {
    /// Reads the envelope from the process environment.
    ///
    /// Spec.md §4.1: if `<BASE>_GRACEFUL_FDS` is set but not a
    /// non-negative integer, startup fails with `Error::Envelope` (fatal —
    /// the supervisor contract is broken). If only `<BASE>_GRACEFUL` is
    /// set without a count, `inherited_fds` is empty.
    pub fn from_env() -> Result<Self> {
        let keys = EnvelopeKeys::current();
        Self::from_env_with_keys(keys)
    }

    fn from_env_with_keys(keys: EnvelopeKeys) -> Result<Self> {
        let is_graceful = std::env::var(&keys.graceful).as_deref() == Ok("true");

        let inherited_fds = match std::env::var(&keys.graceful_fds) {
            Ok(raw) => {
                let count: usize = raw.parse().map_err(|_| {
                    Error::Envelope(format!("{}={:?} is not a non-negative integer", keys.graceful_fds, raw))
                })?;
                (0..count as RawFd)
                    .map(|i| FIRST_INHERITED_FD + i)
                    .collect()
            }
            Err(_) => Vec::new(),
        };

        if is_graceful {
            info!(inherited = inherited_fds.len(), "starting as graceful successor");
        } else {
            debug!("starting cold");
        }

        Ok(Self {
            keys,
            is_graceful,
            inherited_fds,
        })
    }

    pub fn is_graceful(&self) -> bool {
        self.is_graceful
    }

    pub fn inherited_fds(&self) -> &[RawFd] {
        &self.inherited_fds
    }

    /// Builds a generation directly from its fields, bypassing the
    /// environment. Used by other modules' tests that need a graceful
    /// generation with a specific fd count without racing real env vars
    /// keyed on the test binary's own argv[0].
    #[cfg(test)]
    pub(crate) fn synthetic(is_graceful: bool, inherited_fds: Vec<RawFd>) -> Self {
        Self {
            keys: EnvelopeKeys::for_exe("zerodown-synthetic"),
            is_graceful,
            inherited_fds,
        }
    }
}

/// A spawned successor process.
pub struct ChildHandle {
    pub child: Child,
}

impl ChildHandle {
    pub fn pid(&self) -> Option<i32> {
        self.child.id().map(|p| p as i32)
    }
}

/// Forks and execs the current executable with the current arguments,
/// passing `fds` as inherited listener file descriptors (spec.md §4.1).
///
/// The child's environment equals the parent's minus any pre-existing
/// envelope variables, plus `<BASE>_GRACEFUL=true` and
/// `<BASE>_GRACEFUL_FDS=len(fds)` when `fds` is non-empty. The child
/// inherits stdout/stderr; no other file descriptors are leaked — each
/// entry of `fds` is staged onto a temporary descriptor and then `dup2`'d
/// onto `3..3+N-1` inside the child's post-fork, pre-exec address space,
/// which duplicates nothing in the parent and leaves the parent's own
/// copies of those fds untouched.
pub fn spawn_successor(keys: &EnvelopeKeys, fds: &[RawFd]) -> std::io::Result<ChildHandle> {
    let exe = std::env::current_exe()?;
    let args: Vec<_> = std::env::args_os().skip(1).collect();

    let mut command = Command::new(&exe);
    command.args(&args);
    command.stdin(std::process::Stdio::null());
    command.stdout(std::process::Stdio::inherit());
    command.stderr(std::process::Stdio::inherit());

    let mut env = Environment::new();
    for (key, value) in std::env::vars() {
        if key == keys.graceful || key == keys.graceful_fds {
            continue;
        }
        env.set(key, value);
    }
    if !fds.is_empty() {
        env.set(&keys.graceful, "true");
        env.set(&keys.graceful_fds, fds.len().to_string());
    }

    command.env_clear();
    command.envs(env.into_inner());

    let fds = fds.to_vec();
    // SAFETY: `fcntl`/`dup2`/`close` (and the loop around them) are
    // async-signal-safe, which is the only requirement `pre_exec` imposes
    // on its closure. It runs once, after `fork` and before `exec`, in the
    // child's copy of the address space.
    unsafe {
        command.pre_exec(move || {
            // Stage every source fd onto a temporary descriptor guaranteed
            // to sit above the final 3..3+N-1 range before remapping.
            // `dup2`ing straight onto the target slots would be correct
            // only if no binding's own live fd number already falls
            // inside that range — but it can: e.g. binding 1's own
            // listener fd may already be fd 3, the target slot `dup2`
            // would assign to binding 0, and `dup2(binding0_fd, 3)` would
            // silently close binding 1's not-yet-remapped source first.
            // Staging through fds above the whole target range avoids
            // that regardless of which fd numbers the parent happens to
            // hold. It also sidesteps `dup2(fd, fd)`'s POSIX no-op case,
            // which — unlike a real duplication — does not clear
            // `FD_CLOEXEC`, and every fd Rust opens has `FD_CLOEXEC` set
            // by default; a same-fd `dup2` alone would silently drop that
            // listener across `exec`.
            let high_water = FIRST_INHERITED_FD + fds.len() as RawFd;
            let mut staged = Vec::with_capacity(fds.len());
            for &fd in &fds {
                let temp = fcntl(fd, FcntlArg::F_DUPFD_CLOEXEC(high_water))
                    .map_err(|errno| std::io::Error::from_raw_os_error(errno as i32))?;
                staged.push(temp);
            }
            for (i, &temp) in staged.iter().enumerate() {
                let target = FIRST_INHERITED_FD + i as RawFd;
                dup2(temp, target).map_err(|errno| std::io::Error::from_raw_os_error(errno as i32))?;
            }
            for temp in staged {
                let _ = close(temp);
            }
            Ok(())
        });
    }

    let child = command.spawn()?;
    info!(pid = child.id(), fds = fds.len(), "spawned successor");
    Ok(ChildHandle { child })
}

/// Logs the spec.md §9 "inherited-FD surplus" tolerance: more FDs were
/// inherited than the registry has bindings for. Not fatal, per the
/// open question's resolution — just a warning.
pub fn warn_on_surplus(inherited: usize, registered: usize) {
    if inherited > registered {
        warn!(
            inherited,
            registered, "more file descriptors were inherited than registered bindings; surplus discarded"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Process environment mutation is inherently racy across threads;
    /// every test below uses an exe name unique to itself so parallel
    /// test runs never touch the same pair of variables.
    fn set_var(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) };
    }

    fn remove_var(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    #[test]
    fn envelope_keys_uppercase_the_exe_basename() {
        let keys = EnvelopeKeys::for_exe("my-app");
        assert_eq!(keys.graceful, "MY-APP_GRACEFUL");
        assert_eq!(keys.graceful_fds, "MY-APP_GRACEFUL_FDS");
    }

    #[test]
    fn absent_envelope_is_cold_start_with_no_inherited_fds() {
        let keys = EnvelopeKeys::for_exe("zerodown-test-absent");
        remove_var(&keys.graceful);
        remove_var(&keys.graceful_fds);

        let gen = ProcessGeneration::from_env_with_keys(keys).unwrap();
        assert!(!gen.is_graceful());
        assert!(gen.inherited_fds().is_empty());
    }

    #[test]
    fn graceful_without_count_has_empty_inherited_fds() {
        let keys = EnvelopeKeys::for_exe("zerodown-test-nofds");
        set_var(&keys.graceful, "true");
        remove_var(&keys.graceful_fds);

        let gen = ProcessGeneration::from_env_with_keys(keys.clone()).unwrap();
        assert!(gen.is_graceful());
        assert!(gen.inherited_fds().is_empty());

        remove_var(&keys.graceful);
    }

    #[test]
    fn graceful_with_count_lists_fds_starting_at_3() {
        let keys = EnvelopeKeys::for_exe("zerodown-test-fds");
        set_var(&keys.graceful, "true");
        set_var(&keys.graceful_fds, "2");

        let gen = ProcessGeneration::from_env_with_keys(keys.clone()).unwrap();
        assert_eq!(gen.inherited_fds(), &[3, 4]);

        remove_var(&keys.graceful);
        remove_var(&keys.graceful_fds);
    }

    #[test]
    fn malformed_count_is_a_fatal_envelope_error() {
        let keys = EnvelopeKeys::for_exe("zerodown-test-bad");
        set_var(&keys.graceful_fds, "not-a-number");

        let err = ProcessGeneration::from_env_with_keys(keys.clone()).unwrap_err();
        assert!(matches!(err, Error::Envelope(_)));

        remove_var(&keys.graceful_fds);
    }
}
