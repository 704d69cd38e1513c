use std::io::Write;

use nix::sys::signal::Signal;

use crate::job_control;
use crate::jobs::{self, JobError, JobState, JobTable};
use crate::status;

/// The list of all builtin command names.
const BUILTINS: &[&str] = &["cd", "exit", "jobs", "fg"];

#[derive(Debug, PartialEq)]
pub enum BuiltinAction {
    Continue(i32),
    Exit(i32),
}

/// Returns true if the command name is a shell builtin.
pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// Execute a builtin command, writing output to the provided streams.
pub fn execute(
    program: &str,
    args: &[String],
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
    job_table: &mut JobTable,
) -> BuiltinAction {
    match program {
        "cd" => BuiltinAction::Continue(builtin_cd(args, stderr)),
        "exit" => builtin_exit(args, stderr),
        "jobs" => BuiltinAction::Continue(builtin_jobs(job_table, stdout)),
        "fg" => BuiltinAction::Continue(builtin_fg(args, job_table, stdout, stderr)),
        _ => {
            let _ = writeln!(stderr, "msh: unknown builtin: {program}");
            BuiltinAction::Continue(1)
        }
    }
}

fn builtin_cd(args: &[String], stderr: &mut dyn Write) -> i32 {
    let target = match args.first() {
        Some(dir) => dir.clone(),
        None => match std::env::var("HOME") {
            Ok(home) => home,
            Err(_) => {
                let _ = writeln!(stderr, "cd: HOME not set");
                return 1;
            }
        },
    };

    if let Err(e) = std::env::set_current_dir(&target) {
        let _ = writeln!(stderr, "cd: {target}: {e}");
        return 1;
    }

    0
}

fn builtin_exit(args: &[String], stderr: &mut dyn Write) -> BuiltinAction {
    match args.first() {
        None => BuiltinAction::Exit(0),
        Some(s) => match s.parse::<i32>() {
            Ok(code) => BuiltinAction::Exit(code),
            Err(_) => {
                let _ = writeln!(stderr, "exit: {s}: numeric argument required");
                BuiltinAction::Exit(2)
            }
        },
    }
}

// ── Job control builtins ──

/// List all tracked jobs. Jobs shown as Done are consumed.
fn builtin_jobs(job_table: &mut JobTable, stdout: &mut dyn Write) -> i32 {
    for entry in job_table.list() {
        let _ = writeln!(stdout, "{entry}");
        if entry.state == JobState::Done {
            job_table.release(entry.id);
        }
    }
    0
}

/// Wait in the foreground for a background job, then free its slot.
fn builtin_fg(
    args: &[String],
    job_table: &mut JobTable,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32 {
    job_table.reap_nonblocking();

    let job_id = match resolve_job_id(args.first(), job_table.current_id()) {
        Ok(id) => id,
        Err(e) => {
            let _ = writeln!(stderr, "fg: {e}");
            return 1;
        }
    };

    let job = match job_table.take(job_id) {
        Ok(job) => job,
        Err(e) => {
            let _ = writeln!(stderr, "fg: {e}");
            return 1;
        }
    };

    if job.state() == JobState::Done {
        let _ = writeln!(stderr, "fg: {job_id}: job has already finished");
        job_table.release(job_id);
        return 1;
    }

    let _ = writeln!(stdout, "{}", job.summary());
    let _ = stdout.flush();

    // Background stages ignore SIGINT for good, so Ctrl-C becomes SIGTERM.
    let outcomes = job_control::wait_all_forwarding(job.processes_mut(), Signal::SIGTERM);
    if let Some(notice) = status::termination_notice(&outcomes) {
        let _ = write!(stdout, "{notice}");
    }
    let code = jobs::job_status(job).unwrap_or(0);

    job_table.release(job_id);
    code
}

// ── Helpers ──

/// Parse a job ID from an argument (accepts `%N` or `N`), falling back to
/// `default` when no argument is given.
fn resolve_job_id(arg: Option<&String>, default: Option<usize>) -> Result<usize, String> {
    match arg {
        Some(s) => s
            .trim_start_matches('%')
            .parse::<usize>()
            .map_err(|_| format!("{s}: invalid job id")),
        None => default.ok_or_else(|| JobError::NoCurrentJob.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ProcessHandle;
    use nix::unistd::Pid;

    fn run(program: &str, args: &[&str], table: &mut JobTable) -> (BuiltinAction, String, String) {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let mut out = Vec::new();
        let mut err = Vec::new();
        let action = execute(program, &args, &mut out, &mut err, table);
        (
            action,
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    fn finished_job(table: &mut JobTable, pid: i32, summary: &str) -> usize {
        let id = table
            .insert(vec![ProcessHandle::new(Pid::from_raw(pid))], summary.into())
            .unwrap();
        table.record_termination(Pid::from_raw(pid), Some(crate::status::ExitOutcome::Exited(0)));
        id
    }

    #[test]
    fn builtin_names() {
        for name in ["cd", "exit", "jobs", "fg"] {
            assert!(is_builtin(name));
        }
        assert!(!is_builtin("ls"));
        assert!(!is_builtin("bg"));
    }

    #[test]
    fn exit_codes() {
        let mut table = JobTable::default();
        assert_eq!(run("exit", &[], &mut table).0, BuiltinAction::Exit(0));
        assert_eq!(run("exit", &["3"], &mut table).0, BuiltinAction::Exit(3));

        let (action, _, err) = run("exit", &["x"], &mut table);
        assert_eq!(action, BuiltinAction::Exit(2));
        assert!(err.contains("numeric argument required"));
    }

    #[test]
    fn cd_to_missing_directory_fails() {
        let mut table = JobTable::default();
        let (action, _, err) = run("cd", &["/definitely/not/here"], &mut table);
        assert_eq!(action, BuiltinAction::Continue(1));
        assert!(err.starts_with("cd: /definitely/not/here:"), "stderr was: {err}");
    }

    #[test]
    fn jobs_reports_done_once() {
        let mut table = JobTable::default();
        finished_job(&mut table, 0x7fff_0001, "sleep 1");

        let (_, out, _) = run("jobs", &[], &mut table);
        assert_eq!(out, "[1]\tDone\tsleep 1\n");

        let (_, out, _) = run("jobs", &[], &mut table);
        assert_eq!(out, "");
    }

    #[test]
    fn fg_on_missing_job_reports_error() {
        let mut table = JobTable::default();
        let (action, out, err) = run("fg", &["4"], &mut table);
        assert_eq!(action, BuiltinAction::Continue(1));
        assert_eq!(out, "");
        assert_eq!(err, "fg: 4: no such job\n");

        let (_, _, err) = run("fg", &[], &mut table);
        assert_eq!(err, "fg: no current job\n");

        let (_, _, err) = run("fg", &["abc"], &mut table);
        assert_eq!(err, "fg: abc: invalid job id\n");
    }

    #[test]
    fn fg_on_finished_job_consumes_it_without_waiting() {
        let mut table = JobTable::default();
        let id = finished_job(&mut table, 0x7fff_0002, "true");

        let arg = format!("%{id}");
        let (action, out, err) = run("fg", &[arg.as_str()], &mut table);
        assert_eq!(action, BuiltinAction::Continue(1));
        assert_eq!(out, "");
        assert_eq!(err, "fg: 1: job has already finished\n");
        assert!(table.snapshot().is_empty());
    }
}
