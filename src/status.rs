use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;

/// How an observed process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Exited(i32),
    KilledBySignal { signal: Signal, core_dumped: bool },
}

impl ExitOutcome {
    /// Translate a wait status into an outcome.
    ///
    /// Returns `None` for anything that is not a termination (stop/continue
    /// reports, `StillAlive`).
    pub fn from_wait_status(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(_, code) => Some(ExitOutcome::Exited(code)),
            WaitStatus::Signaled(_, signal, core_dumped) => Some(ExitOutcome::KilledBySignal {
                signal,
                core_dumped,
            }),
            _ => None,
        }
    }

    /// Shell-style exit code: the status itself, or `128 + signal`.
    pub fn code(&self) -> i32 {
        match *self {
            ExitOutcome::Exited(code) => code,
            ExitOutcome::KilledBySignal { signal, .. } => 128 + signal as i32,
        }
    }
}

/// The one notice printed after a foreground pipeline that was cut short
/// from the keyboard, if any.
///
/// `SIGQUIT` wins over `SIGINT`; an interrupt gets a bare newline so the
/// prompt starts on a fresh line.
pub fn termination_notice(outcomes: &[ExitOutcome]) -> Option<&'static str> {
    let mut notice = None;
    for outcome in outcomes {
        match outcome {
            ExitOutcome::KilledBySignal {
                signal: Signal::SIGQUIT,
                core_dumped,
            } => {
                return Some(if *core_dumped { "Quit (core dumped)\n" } else { "Quit\n" });
            }
            ExitOutcome::KilledBySignal {
                signal: Signal::SIGINT,
                ..
            } => notice = Some("\n"),
            _ => {}
        }
    }
    notice
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Pid;

    #[test]
    fn exited_status_keeps_code() {
        let outcome = ExitOutcome::from_wait_status(WaitStatus::Exited(Pid::from_raw(42), 3));
        assert_eq!(outcome, Some(ExitOutcome::Exited(3)));
        assert_eq!(outcome.unwrap().code(), 3);
    }

    #[test]
    fn signaled_status_maps_to_128_plus_signal() {
        let outcome =
            ExitOutcome::from_wait_status(WaitStatus::Signaled(Pid::from_raw(42), Signal::SIGINT, false))
                .unwrap();
        assert_eq!(outcome.code(), 130);

        let outcome =
            ExitOutcome::from_wait_status(WaitStatus::Signaled(Pid::from_raw(42), Signal::SIGKILL, false))
                .unwrap();
        assert_eq!(outcome.code(), 137);
    }

    #[test]
    fn non_terminal_statuses_are_ignored() {
        assert_eq!(ExitOutcome::from_wait_status(WaitStatus::StillAlive), None);
        assert_eq!(
            ExitOutcome::from_wait_status(WaitStatus::Stopped(Pid::from_raw(1), Signal::SIGSTOP)),
            None
        );
    }

    #[test]
    fn notices_prefer_quit_over_interrupt() {
        let int = ExitOutcome::KilledBySignal { signal: Signal::SIGINT, core_dumped: false };
        let quit = ExitOutcome::KilledBySignal { signal: Signal::SIGQUIT, core_dumped: true };

        assert_eq!(termination_notice(&[ExitOutcome::Exited(0)]), None);
        assert_eq!(termination_notice(&[int, ExitOutcome::Exited(0)]), Some("\n"));
        assert_eq!(termination_notice(&[int, quit]), Some("Quit (core dumped)\n"));
        assert_eq!(
            termination_notice(&[ExitOutcome::KilledBySignal {
                signal: Signal::SIGTERM,
                core_dumped: false
            }]),
            None
        );
    }
}
