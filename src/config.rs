use log::{debug, warn};

use crate::jobs;

const DEFAULT_PROMPT: &str = "msh> ";

/// Start-up settings, read once from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct ShellConfig {
    /// `MSH_PROMPT`; only shown when stdin is a terminal.
    pub prompt: String,
    /// `MSH_MAX_JOBS`
    pub max_jobs: usize,
    /// `MSH_NOTIFY`: report (and consume) finished jobs before each prompt.
    pub notify_done: bool,
    /// `MSH_BG_IGNORE_QUIT`: background children ignore `SIGQUIT` as well
    /// as `SIGINT`.
    pub background_ignores_quit: bool,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT.to_string(),
            max_jobs: jobs::DEFAULT_CAPACITY,
            notify_done: false,
            background_ignores_quit: true,
        }
    }
}

impl ShellConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source. Unusable values are
    /// logged and replaced by the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let config = Self {
            prompt: lookup("MSH_PROMPT").unwrap_or(defaults.prompt),
            max_jobs: lookup("MSH_MAX_JOBS")
                .and_then(|raw| match raw.trim().parse::<usize>() {
                    Ok(n) if n > 0 => Some(n),
                    _ => {
                        warn!("ignoring MSH_MAX_JOBS={raw:?}: expected a positive integer");
                        None
                    }
                })
                .unwrap_or(defaults.max_jobs),
            notify_done: flag(&lookup, "MSH_NOTIFY").unwrap_or(defaults.notify_done),
            background_ignores_quit: flag(&lookup, "MSH_BG_IGNORE_QUIT")
                .unwrap_or(defaults.background_ignores_quit),
        };
        debug!("configuration: {config:?}");
        config
    }
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    let raw = lookup(key)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => {
            warn!("ignoring {key}={raw:?}: expected a boolean");
            None
        }
    }
}
