mod ast;
mod builtins;
mod config;
mod executor;
mod job_control;
mod jobs;
mod parser;
mod redirect;
mod signals;
mod status;

use std::io::{self, BufRead, IsTerminal, Write};

use log::{debug, error};
use nix::sys::signal::Signal;

use crate::builtins::BuiltinAction;
use crate::config::ShellConfig;
use crate::jobs::{JobState, JobTable};

fn main() {
    env_logger::init();

    let config = ShellConfig::from_env();
    let interactive = io::stdin().is_terminal();
    let prompt = interactive.then(|| config.prompt.clone());

    if let Err(e) = signals::install_shell_handlers(prompt.clone()) {
        error!("cannot install signal handlers: {e}");
        eprintln!("msh: cannot install signal handlers: {e}");
        std::process::exit(1);
    }

    let mut job_table = JobTable::with_capacity(config.max_jobs);
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut last_exit_code: i32 = 0;

    let exit_code = loop {
        job_table.reap_nonblocking();
        if config.notify_done {
            notify_finished(&mut job_table);
        }

        if let Some(prompt) = &prompt {
            print!("{prompt}");
        }
        if stdout.flush().is_err() {
            break last_exit_code;
        }

        // Bytes, not `read_line`: a stray non-UTF-8 byte must not end the session.
        let mut input = Vec::new();
        match stdin.lock().read_until(b'\n', &mut input) {
            Ok(0) => {
                if interactive {
                    println!();
                }
                break last_exit_code;
            }
            Ok(_) => {
                let input = String::from_utf8_lossy(&input);
                let line = input.trim();
                let spec = match parser::parse_line(line) {
                    Ok(Some(spec)) => spec,
                    Ok(None) => continue,
                    Err(e) => {
                        eprintln!("msh: {e}");
                        last_exit_code = 2;
                        continue;
                    }
                };

                let first = &spec.stages[0];
                let runs_in_shell = spec.is_simple() && !spec.background;
                if !runs_in_shell {
                    if let Some(stage) = spec.stages.iter().find(|s| builtins::is_builtin(&s.program)) {
                        eprintln!(
                            "msh: {}: builtins cannot be piped, redirected or run in the background",
                            stage.program
                        );
                        last_exit_code = 1;
                        continue;
                    }
                }
                if builtins::is_builtin(&first.program) {
                    let action = builtins::execute(
                        &first.program,
                        &first.args,
                        &mut io::stdout(),
                        &mut io::stderr(),
                        &mut job_table,
                    );
                    match action {
                        BuiltinAction::Continue(code) => last_exit_code = code,
                        BuiltinAction::Exit(code) => break code,
                    }
                    continue;
                }

                let summary = line.trim_end_matches('&').trim_end();
                last_exit_code = executor::execute(&spec, summary, &mut job_table, &config);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                eprintln!("msh: error reading input: {e}");
                break 1;
            }
        }
    };

    // Leave no managed child behind.
    debug!("exiting with status {exit_code}");
    job_table.signal_all(Signal::SIGHUP);
    std::process::exit(exit_code);
}

/// Print `[id]+ Done` for every finished job and free its slot.
fn notify_finished(job_table: &mut JobTable) {
    for entry in job_table.snapshot() {
        if entry.state == JobState::Done {
            println!("[{}]+ Done\t{}", entry.id, entry.summary);
            job_table.release(entry.id);
        }
    }
}
