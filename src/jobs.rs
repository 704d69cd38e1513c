use std::fmt;

use log::{debug, trace, warn};
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use thiserror::Error;

use crate::executor::{Liveness, ProcessHandle};
use crate::job_control;
use crate::status::ExitOutcome;

/// Default number of job slots.
pub const DEFAULT_CAPACITY: usize = 20;

/// The lifecycle state of a tracked job. Only ever moves Running → Done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Done,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobState::Running => "Running",
            JobState::Done => "Done",
        })
    }
}

/// A backgrounded pipeline.
#[derive(Debug)]
pub struct Job {
    id: usize,
    /// Creation order, used to find the most recent job.
    seq: u64,
    processes: Vec<ProcessHandle>,
    summary: String,
    state: JobState,
}

impl Job {
    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Member handles, for a foreground wait. The member set itself is fixed.
    pub fn processes_mut(&mut self) -> &mut [ProcessHandle] {
        &mut self.processes
    }

    /// Re-derive the state from the members: Done once none is alive.
    fn refresh(&mut self) {
        if self.state == JobState::Running && self.processes.iter().all(|p| !p.is_alive()) {
            debug!("job [{}] done: {}", self.id, self.summary);
            self.state = JobState::Done;
        }
    }
}

/// One line of `jobs` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEntry {
    pub id: usize,
    pub state: JobState,
    pub summary: String,
}

impl fmt::Display for JobEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]\t{}\t{}", self.id, self.state, self.summary)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("job table full ({0} slots)")]
    TableFull(usize),
    #[error("{0}: no such job")]
    NotFound(usize),
    #[error("no current job")]
    NoCurrentJob,
}

/// The shell's job table: a fixed number of slots, job `n` living in slot
/// `n - 1`.
///
/// A slot frees up only when its job is explicitly released (after `fg` has
/// waited on it, or after `jobs` has shown it as Done), never merely because
/// its processes ended.
pub struct JobTable {
    slots: Vec<Option<Job>>,
    next_seq: u64,
}

impl Default for JobTable {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl JobTable {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity.max(1)).map(|_| None).collect(),
            next_seq: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Register a backgrounded pipeline in the lowest free slot.
    pub fn insert(&mut self, processes: Vec<ProcessHandle>, summary: String) -> Result<usize, JobError> {
        let Some(index) = self.slots.iter().position(Option::is_none) else {
            return Err(JobError::TableFull(self.capacity()));
        };
        let id = index + 1;
        let mut job = Job {
            id,
            seq: self.next_seq,
            processes,
            summary,
            state: JobState::Running,
        };
        // Members reaped before insertion still count.
        job.refresh();
        debug!("job [{id}] created: {}", job.summary);
        self.next_seq += 1;
        self.slots[index] = Some(job);
        Ok(id)
    }

    /// Collect every terminated child without blocking and update the jobs
    /// that own them.
    ///
    /// Children no job claims (foreground leftovers, pipelines the table was
    /// too full to hold) are reaped all the same.
    pub fn reap_nonblocking(&mut self) {
        while let Some((pid, outcome)) = job_control::poll_any_child() {
            if !self.record_termination(pid, Some(outcome)) {
                trace!("reaped untracked child {pid}: {outcome:?}");
            }
        }
    }

    /// Mark `pid` as terminated in whichever Running job still has it alive.
    /// Returns whether some job did.
    ///
    /// Handles that already terminated are skipped: the kernel may have
    /// handed their pid to a newer child.
    pub fn record_termination(&mut self, pid: Pid, outcome: Option<ExitOutcome>) -> bool {
        let running = self
            .slots
            .iter_mut()
            .flatten()
            .filter(|job| job.state == JobState::Running);
        for job in running {
            let member = job.processes.iter_mut().find(|p| p.is_alive() && p.pid() == pid);
            if let Some(process) = member {
                process.mark_terminated(outcome);
                job.refresh();
                return true;
            }
        }
        false
    }

    /// Reap, then snapshot every occupied slot in ascending id order.
    pub fn list(&mut self) -> Vec<JobEntry> {
        self.reap_nonblocking();
        self.snapshot()
    }

    /// Snapshot without reaping.
    pub fn snapshot(&self) -> Vec<JobEntry> {
        self.slots
            .iter()
            .flatten()
            .map(|job| JobEntry {
                id: job.id,
                state: job.state,
                summary: job.summary.clone(),
            })
            .collect()
    }

    /// Look up an occupied slot. The job stays in the table until
    /// [`JobTable::release`] is called.
    pub fn take(&mut self, id: usize) -> Result<&mut Job, JobError> {
        id.checked_sub(1)
            .and_then(|index| self.slots.get_mut(index))
            .and_then(Option::as_mut)
            .ok_or(JobError::NotFound(id))
    }

    /// Free a slot, handing back the job that occupied it.
    pub fn release(&mut self, id: usize) -> Option<Job> {
        let job = self.slots.get_mut(id.checked_sub(1)?)?.take();
        if job.is_some() {
            debug!("job [{id}] released");
        }
        job
    }

    /// The job `fg` picks without an argument: the newest Running job, or
    /// failing that the newest job of any state.
    pub fn current_id(&self) -> Option<usize> {
        let newest = |running_only: bool| {
            self.slots
                .iter()
                .flatten()
                .filter(|job| !running_only || job.state == JobState::Running)
                .max_by_key(|job| job.seq)
                .map(|job| job.id)
        };
        newest(true).or_else(|| newest(false))
    }

    /// Send `sig` to every live member of every job and collect whatever has
    /// already exited. Used when the shell leaves.
    pub fn signal_all(&mut self, sig: Signal) {
        for job in self.slots.iter().flatten() {
            for process in job.processes.iter().filter(|p| p.is_alive()) {
                debug!("sending {sig} to {} (job [{}])", process.pid(), job.id);
                if let Err(e) = job_control::send_signal(process.pid(), sig) {
                    warn!("kill({}, {sig}) failed: {e}", process.pid());
                }
            }
        }
        self.reap_nonblocking();
    }
}

/// Exit code of a job's last stage, when it was observed.
pub fn job_status(job: &Job) -> Option<i32> {
    match job.processes.last()?.liveness() {
        Liveness::Terminated(Some(outcome)) => Some(outcome.code()),
        _ => None,
    }
}
