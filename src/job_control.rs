use log::{debug, trace, warn};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;

use crate::executor::ProcessHandle;
use crate::signals::{self, ForegroundGuard};
use crate::status::ExitOutcome;

/// Block until `pid` terminates.
///
/// Interrupted waits are retried. `Ok(None)` means the kernel has no such
/// child any more (someone else reaped it).
pub(crate) fn wait_for_pid(pid: Pid) -> nix::Result<Option<ExitOutcome>> {
    loop {
        match waitpid(pid, None) {
            Ok(status) => {
                if let Some(outcome) = ExitOutcome::from_wait_status(status) {
                    return Ok(Some(outcome));
                }
            }
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => return Ok(None),
            Err(e) => return Err(e),
        }
    }
}

/// Wait for every still-live process of a foreground pipeline.
///
/// While this runs the processes are the signal mediator's foreground
/// target, so a caught `SIGINT` is forwarded to them. Each handle is marked
/// terminated as it is collected. Outcomes come back in stage order and only
/// for processes that were actually observed.
pub fn wait_all(processes: &mut [ProcessHandle]) -> Vec<ExitOutcome> {
    wait_all_forwarding(processes, Signal::SIGINT)
}

/// [`wait_all`], with a caught `SIGINT` delivered to the processes as
/// `forward`.
pub fn wait_all_forwarding(processes: &mut [ProcessHandle], forward: Signal) -> Vec<ExitOutcome> {
    let live: Vec<Pid> = processes
        .iter()
        .filter(|p| p.is_alive())
        .map(ProcessHandle::pid)
        .collect();
    let _guard = ForegroundGuard::enter(live, forward);
    trace!("mediator: {:?}", signals::state());

    let mut outcomes = Vec::with_capacity(processes.len());
    for process in processes.iter_mut().filter(|p| p.is_alive()) {
        match wait_for_pid(process.pid()) {
            Ok(outcome) => {
                debug!("{} finished: {outcome:?}", process.pid());
                process.mark_terminated(outcome);
                outcomes.extend(outcome);
            }
            Err(e) => {
                warn!("waitpid({}) failed: {e}", process.pid());
                process.mark_terminated(None);
            }
        }
    }
    outcomes
}

/// Collect one terminated child of any kind without blocking.
///
/// Returns `None` when nothing is ready or there are no children at all.
pub(crate) fn poll_any_child() -> Option<(Pid, ExitOutcome)> {
    loop {
        match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => return None,
            Ok(status) => {
                let (Some(pid), Some(outcome)) = (status.pid(), ExitOutcome::from_wait_status(status))
                else {
                    continue;
                };
                return Some((pid, outcome));
            }
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => return None,
            Err(e) => {
                warn!("waitpid(-1, WNOHANG) failed: {e}");
                return None;
            }
        }
    }
}

/// Send `sig` to `pid`, treating an already-gone process as success.
pub(crate) fn send_signal(pid: Pid, sig: Signal) -> nix::Result<()> {
    match signal::kill(pid, sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e),
    }
}
