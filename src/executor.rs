use std::ffi::{CStr, CString};
use std::io::{self, Write};
use std::os::fd::RawFd;

use log::{debug, warn};
use nix::errno::Errno;
use nix::fcntl::{self, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::{self, ForkResult, Pid};
use thiserror::Error;

use crate::ast::PipelineSpec;
use crate::config::ShellConfig;
use crate::job_control;
use crate::jobs::JobTable;
use crate::redirect::{self, PipeChannel, StageWiring, StreamTarget};
use crate::signals::ChildSignalPolicy;
use crate::status::{self, ExitOutcome};

/// Exit status of a stage whose program could not be found or executed.
pub const EXEC_FAILURE_STATUS: i32 = 127;
/// Exit status of a stage whose redirection could not be set up.
pub const REDIRECT_FAILURE_STATUS: i32 = 1;

/// Whether a tracked process is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    /// Reaped. The outcome is `None` if the kernel had no record left to
    /// report.
    Terminated(Option<ExitOutcome>),
}

/// One launched stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pid: Pid,
    liveness: Liveness,
}

impl ProcessHandle {
    pub fn new(pid: Pid) -> Self {
        Self {
            pid,
            liveness: Liveness::Alive,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness
    }

    pub fn is_alive(&self) -> bool {
        self.liveness == Liveness::Alive
    }

    /// Record termination. A handle never comes back to life.
    pub fn mark_terminated(&mut self, outcome: Option<ExitOutcome>) {
        if self.is_alive() {
            self.liveness = Liveness::Terminated(outcome);
        }
    }
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("cannot create pipe: {0}")]
    Pipe(#[source] io::Error),
    /// `started` holds the stages forked before the failure; they keep running.
    #[error("{program}: cannot fork: {source}")]
    Fork {
        program: String,
        source: Errno,
        started: Vec<ProcessHandle>,
    },
    #[error("{0}: argument contains a NUL byte")]
    NulByte(String),
}

/// Everything a child needs, converted before `fork` so the child only has
/// syscalls left to make.
struct PreparedStage {
    program: CString,
    argv: Vec<CString>,
    wiring: StageWiring<CString>,
}

fn prepare(spec: &PipelineSpec) -> Result<Vec<PreparedStage>, LaunchError> {
    let mut prepared = Vec::with_capacity(spec.len());
    for (index, stage) in spec.stages.iter().enumerate() {
        let nul = |_| LaunchError::NulByte(stage.program.clone());
        let program = CString::new(stage.program.as_str()).map_err(nul)?;
        let mut argv = Vec::with_capacity(stage.args.len() + 1);
        argv.push(program.clone());
        for arg in &stage.args {
            argv.push(CString::new(arg.as_str()).map_err(nul)?);
        }
        let wiring = StageWiring::for_stage(spec, index)
            .to_c_paths()
            .map_err(nul)?;
        prepared.push(PreparedStage { program, argv, wiring });
    }
    Ok(prepared)
}

/// Fork one process per stage, wired through `channels`.
///
/// Pids come back in stage order. A fork failure stops the launch but does
/// not kill the stages already started: they are handed back inside
/// [`LaunchError::Fork`]. The caller still owns `channels` and must drop
/// them once this returns.
pub fn launch(
    spec: &PipelineSpec,
    channels: &[PipeChannel],
    policy: ChildSignalPolicy,
) -> Result<Vec<ProcessHandle>, LaunchError> {
    let stages = prepare(spec)?;
    let mut started = Vec::with_capacity(stages.len());

    for (index, stage) in stages.iter().enumerate() {
        // SAFETY: the child only performs raw syscalls on data prepared
        // above before it execs or calls `_exit`.
        match unsafe { unistd::fork() } {
            Ok(ForkResult::Child) => run_stage(stage, channels, policy),
            Ok(ForkResult::Parent { child }) => {
                debug!("stage {index} ({:?}) started as {child}", stage.program);
                started.push(ProcessHandle::new(child));
            }
            Err(source) => {
                return Err(LaunchError::Fork {
                    program: spec.stages[index].program.clone(),
                    source,
                    started,
                });
            }
        }
    }

    Ok(started)
}

// ── Child side ──

fn run_stage(stage: &PreparedStage, channels: &[PipeChannel], policy: ChildSignalPolicy) -> ! {
    policy.apply();

    for (target, fd) in [
        (&stage.wiring.stdin, libc::STDIN_FILENO),
        (&stage.wiring.stdout, libc::STDOUT_FILENO),
        (&stage.wiring.stderr, libc::STDERR_FILENO),
    ] {
        if let StreamTarget::File(path) = target {
            if let Err(e) = redirect_file(path, fd) {
                child_exit(
                    REDIRECT_FAILURE_STATUS,
                    format_args!("msh: {}: {}\n", path.to_string_lossy(), e.desc()),
                );
            }
        }
    }

    for (target, fd) in [
        (&stage.wiring.stdin, libc::STDIN_FILENO),
        (&stage.wiring.stdout, libc::STDOUT_FILENO),
    ] {
        let StreamTarget::Channel(i) = *target else {
            continue;
        };
        let end = if fd == libc::STDIN_FILENO {
            channels[i].read_fd()
        } else {
            channels[i].write_fd()
        };
        if let Err(e) = unistd::dup2(end, fd) {
            child_exit(
                REDIRECT_FAILURE_STATUS,
                format_args!("msh: cannot connect pipe to fd {fd}: {}\n", e.desc()),
            );
        }
    }
    // The duplicates above survive on their own; every original goes too.
    for channel in channels {
        let _ = unistd::close(channel.read_fd());
        let _ = unistd::close(channel.write_fd());
    }

    let err = match unistd::execvp(&stage.program, &stage.argv) {
        Err(e) => e,
        Ok(never) => match never {},
    };
    let name = stage.program.to_string_lossy();
    if err == Errno::ENOENT {
        child_exit(
            EXEC_FAILURE_STATUS,
            format_args!("msh: command not found: {name}\n"),
        )
    } else {
        child_exit(EXEC_FAILURE_STATUS, format_args!("msh: {name}: {}\n", err.desc()))
    }
}

fn redirect_file(path: &CStr, target: RawFd) -> nix::Result<()> {
    let flags = if target == libc::STDIN_FILENO {
        OFlag::O_RDONLY
    } else {
        OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC
    };
    let fd = fcntl::open(path, flags, Mode::from_bits_truncate(0o644))?;
    let dup = unistd::dup2(fd, target);
    let _ = unistd::close(fd);
    dup.map(drop)
}

fn child_exit(code: i32, message: std::fmt::Arguments<'_>) -> ! {
    let _ = io::stderr().write_fmt(message);
    // SAFETY: leaves without running the parent's atexit handlers or
    // flushing buffers inherited from it.
    unsafe { libc::_exit(code) }
}

// ── Shell side ──

/// Run a parsed pipeline: plan channels, launch, then either block on it or
/// register it as a job.
///
/// Returns the shell exit status of the line: the last stage's code for a
/// foreground pipeline, 0 once a background job is registered.
pub fn execute(
    spec: &PipelineSpec,
    summary: &str,
    job_table: &mut JobTable,
    config: &ShellConfig,
) -> i32 {
    let channels = match redirect::plan(spec.len()) {
        Ok(channels) => channels,
        Err(e) => {
            eprintln!("msh: {}", LaunchError::Pipe(e));
            return 1;
        }
    };

    let policy = ChildSignalPolicy {
        background: spec.background,
        background_ignores_quit: config.background_ignores_quit,
    };
    let launched = launch(spec, &channels, policy);
    // Every child has its own copies by now.
    drop(channels);

    let mut processes = match launched {
        Ok(processes) => processes,
        Err(e) => {
            eprintln!("msh: {e}");
            match e {
                LaunchError::Fork { started, .. } if !started.is_empty() => started,
                _ => return 1,
            }
        }
    };

    if spec.background {
        let Some(last) = processes.last().map(ProcessHandle::pid) else {
            return 1;
        };
        return match job_table.insert(processes, summary.to_string()) {
            Ok(id) => {
                println!("[{id}] {last}");
                0
            }
            Err(e) => {
                // Left unmanaged: the generic reap still collects its stages.
                warn!("background pipeline `{summary}` not tracked: {e}");
                eprintln!("msh: jobs: {e}; `{summary}` runs unmanaged");
                1
            }
        };
    }

    let outcomes = job_control::wait_all(&mut processes);
    if let Some(notice) = status::termination_notice(&outcomes) {
        print!("{notice}");
        let _ = io::stdout().flush();
    }
    last_status(&processes)
}

/// Exit code of the last stage, if it was observed.
pub fn last_status(processes: &[ProcessHandle]) -> i32 {
    match processes.last().map(ProcessHandle::liveness) {
        Some(Liveness::Terminated(Some(outcome))) => outcome.code(),
        _ => 0,
    }
}
