//! Shell-level and child-level handling of `SIGINT` / `SIGQUIT`.
//!
//! The shell keeps a single process-wide record of the current foreground
//! target. It starts out empty (`Idle`) and needs no teardown.
//!
//! The real signal handler is installed by `ctrlc`; it only writes a byte to
//! a self-pipe. The closure below runs afterwards on an ordinary thread, so
//! it may lock, print and call `kill`. All job-table bookkeeping stays on
//! the main thread.

use std::io::{self, Write};
use std::sync::Mutex;

use log::{debug, trace};
use nix::sys::signal::{self, SigHandler, Signal};
use nix::unistd::Pid;

use crate::job_control;

/// The foreground pipeline being waited on; no pids while idle.
struct Target {
    pids: Vec<Pid>,
    /// What a caught `SIGINT` is turned into for these pids.
    forward: Signal,
}

static FOREGROUND: Mutex<Target> = Mutex::new(Target {
    pids: Vec::new(),
    forward: Signal::SIGINT,
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediatorState {
    Idle,
    Foregrounding(Vec<Pid>),
}

pub fn state() -> MediatorState {
    let target = FOREGROUND.lock().unwrap_or_else(|e| e.into_inner());
    if target.pids.is_empty() {
        MediatorState::Idle
    } else {
        MediatorState::Foregrounding(target.pids.clone())
    }
}

/// Install the shell's own dispositions.
///
/// `SIGINT` is caught: forwarded to every foreground member, or absorbed
/// with a fresh prompt line while idle. `SIGQUIT` is ignored outright.
/// `prompt` is `None` when stdin is not a terminal.
pub fn install_shell_handlers(prompt: Option<String>) -> io::Result<()> {
    ctrlc::set_handler(move || on_interrupt(prompt.as_deref())).map_err(io::Error::other)?;

    // SAFETY: SIG_IGN installs no handler code.
    unsafe { signal::signal(Signal::SIGQUIT, SigHandler::SigIgn) }?;
    Ok(())
}

fn on_interrupt(prompt: Option<&str>) {
    let target = FOREGROUND.lock().unwrap_or_else(|e| e.into_inner());
    if target.pids.is_empty() {
        let mut stdout = io::stdout();
        let _ = write!(stdout, "\n{}", prompt.unwrap_or_default());
        let _ = stdout.flush();
        return;
    }

    let sig = target.forward;
    for &pid in target.pids.iter() {
        debug!("forwarding interrupt to {pid} as {sig}");
        if let Err(e) = job_control::send_signal(pid, sig) {
            debug!("kill({pid}, {sig}) failed: {e}");
        }
    }
}

/// Marks a pipeline as the foreground target for as long as it lives.
///
/// A caught `SIGINT` is sent on to the pids as `forward`. Jobs resumed with
/// `fg` were started with `SIGINT` ignored, so they get `SIGTERM` instead.
/// Dropping the guard returns the mediator to `Idle`.
pub struct ForegroundGuard(());

impl ForegroundGuard {
    pub fn enter(pids: impl IntoIterator<Item = Pid>, forward: Signal) -> Self {
        let mut target = FOREGROUND.lock().unwrap_or_else(|e| e.into_inner());
        target.pids.clear();
        target.pids.extend(pids);
        target.forward = forward;
        trace!("foregrounding {:?} (interrupt as {forward})", target.pids);
        ForegroundGuard(())
    }
}

impl Drop for ForegroundGuard {
    fn drop(&mut self) {
        let mut target = FOREGROUND.lock().unwrap_or_else(|e| e.into_inner());
        target.pids.clear();
        target.forward = Signal::SIGINT;
        trace!("foreground target cleared");
    }
}

/// Dispositions a freshly forked child applies before redirections and exec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildSignalPolicy {
    pub background: bool,
    /// Whether background children also ignore `SIGQUIT`.
    pub background_ignores_quit: bool,
}

impl ChildSignalPolicy {
    pub fn dispositions(&self) -> [(Signal, SigHandler); 3] {
        let int = if self.background { SigHandler::SigIgn } else { SigHandler::SigDfl };
        let quit = if self.background && self.background_ignores_quit {
            SigHandler::SigIgn
        } else {
            SigHandler::SigDfl
        };
        // The Rust runtime ignores SIGPIPE; ignored dispositions survive exec.
        [
            (Signal::SIGINT, int),
            (Signal::SIGQUIT, quit),
            (Signal::SIGPIPE, SigHandler::SigDfl),
        ]
    }

    /// Apply the policy in the calling process. Only meant for a child
    /// between `fork` and `exec`.
    pub fn apply(&self) {
        for (sig, handler) in self.dispositions() {
            // SAFETY: only SIG_DFL / SIG_IGN are installed.
            let _ = unsafe { signal::signal(sig, handler) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foreground_policy_restores_defaults() {
        let policy = ChildSignalPolicy { background: false, background_ignores_quit: true };
        for (_, handler) in policy.dispositions() {
            assert_eq!(handler, SigHandler::SigDfl);
        }
    }

    #[test]
    fn background_policy_ignores_interrupt() {
        let policy = ChildSignalPolicy { background: true, background_ignores_quit: true };
        assert_eq!(
            policy.dispositions(),
            [
                (Signal::SIGINT, SigHandler::SigIgn),
                (Signal::SIGQUIT, SigHandler::SigIgn),
                (Signal::SIGPIPE, SigHandler::SigDfl),
            ]
        );

        let policy = ChildSignalPolicy { background: true, background_ignores_quit: false };
        assert_eq!(policy.dispositions()[1], (Signal::SIGQUIT, SigHandler::SigDfl));
    }

    #[test]
    fn guard_tracks_foreground_target() {
        assert_eq!(state(), MediatorState::Idle);
        {
            let pids = [Pid::from_raw(1001), Pid::from_raw(1002)];
            let _guard = ForegroundGuard::enter(pids, Signal::SIGINT);
            assert_eq!(state(), MediatorState::Foregrounding(pids.to_vec()));
        }
        assert_eq!(state(), MediatorState::Idle);
    }
}
