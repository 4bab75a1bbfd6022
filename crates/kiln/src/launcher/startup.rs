//! The bundle startup sequence
//!
//! A bundle starts in four steps that must happen in order:
//!
//! ```text
//! Uninitialized -> SearchPathConfigured -> HooksRunning(0..n) -> EntryPointActive
//!                                               |
//!                                               v
//!                                  FailedStartup(hook, cause)
//! ```
//!
//! `bootstrap.py` performs this sequence inside the bundled interpreter. The
//! same sequence is modeled here so a staged bundle can be checked before it
//! is committed, with the side effects supplied by a [`HookExecutor`].

use std::{collections::BTreeMap, fmt, path::PathBuf};

use log::{debug, trace};
use thiserror::Error;

use super::config::{LaunchConfig, LaunchHook};
use crate::error::BuildError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupState {
    Uninitialized,
    SearchPathConfigured,
    /// Hook `i` is the next to run (or the one running)
    HooksRunning(usize),
    EntryPointActive,
    FailedStartup { hook_index: usize, cause: String },
}

impl fmt::Display for StartupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "Uninitialized"),
            Self::SearchPathConfigured => write!(f, "SearchPathConfigured"),
            Self::HooksRunning(index) => write!(f, "HooksRunning({index})"),
            Self::EntryPointActive => write!(f, "EntryPointActive"),
            Self::FailedStartup { hook_index, .. } => write!(f, "FailedStartup({hook_index})"),
        }
    }
}

/// Process-wide state hooks communicate through
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessState {
    /// Module search locations, bundle-only once configured
    pub search_path: Vec<PathBuf>,
    pub environment: BTreeMap<String, String>,
    /// Names of hooks that ran to completion, in order
    pub completed_hooks: Vec<String>,
    pub main_module: Option<String>,
}

/// Side effects of the startup sequence
pub trait HookExecutor {
    /// Run one hook against the shared process state
    fn run_hook(&mut self, hook: &LaunchHook, process: &mut ProcessState) -> Result<(), String>;

    /// Transfer control to the entry module
    fn run_entry_point(&mut self, module: &str, process: &mut ProcessState) -> Result<(), String>;
}

#[derive(Debug, Error)]
pub enum StartupFailure {
    #[error("runtime hook #{index} '{hook}' failed: {cause}")]
    Hook {
        index: usize,
        hook: String,
        cause: String,
        /// Process state at the time of failure, including earlier hooks' effects
        process: ProcessState,
    },

    #[error("entry module '{module}' failed to start: {cause}")]
    EntryPoint { module: String, cause: String },

    #[error("cannot move from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

impl From<StartupFailure> for BuildError {
    fn from(failure: StartupFailure) -> Self {
        match failure {
            StartupFailure::Hook {
                index, hook, cause, ..
            } => Self::HookExecutionFailure { index, hook, cause },
            StartupFailure::EntryPoint { module, .. } => Self::EntryNotBundled { module },
            StartupFailure::InvalidTransition { from, to } => Self::HookConfiguration {
                index: 0,
                hook: "<startup>".to_owned(),
                reason: format!("invalid startup transition {from} -> {to}"),
            },
        }
    }
}

/// Drives a [`LaunchConfig`] through the startup states
#[derive(Debug)]
pub struct Startup<'a> {
    config: &'a LaunchConfig,
    internal_dir: PathBuf,
    state: StartupState,
    process: ProcessState,
}

impl<'a> Startup<'a> {
    pub fn new(config: &'a LaunchConfig, internal_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            internal_dir: internal_dir.into(),
            state: StartupState::Uninitialized,
            process: ProcessState::default(),
        }
    }

    pub fn state(&self) -> &StartupState {
        &self.state
    }

    pub fn process(&self) -> &ProcessState {
        &self.process
    }

    fn invalid(&self, to: &str) -> StartupFailure {
        StartupFailure::InvalidTransition {
            from: self.state.to_string(),
            to: to.to_owned(),
        }
    }

    /// Replace module search with the bundle's archive and binary tree
    pub fn configure_search_path(&mut self) -> Result<(), StartupFailure> {
        if self.state != StartupState::Uninitialized {
            return Err(self.invalid("SearchPathConfigured"));
        }
        self.process.search_path = vec![
            self.internal_dir.join(&self.config.archive),
            self.internal_dir.join(&self.config.bin_dir),
        ];
        self.state = StartupState::SearchPathConfigured;
        trace!("Startup: search path {:?}", self.process.search_path);
        Ok(())
    }

    /// Run the next hook; returns `false` once every hook has run
    pub fn run_next_hook(&mut self, executor: &mut dyn HookExecutor) -> Result<bool, StartupFailure> {
        let index = match self.state {
            StartupState::SearchPathConfigured => 0,
            StartupState::HooksRunning(index) => index,
            _ => return Err(self.invalid("HooksRunning")),
        };
        self.state = StartupState::HooksRunning(index);

        let Some(hook) = self.config.hooks.get(index) else {
            return Ok(false);
        };
        trace!("Startup: running hook #{index} '{}'", hook.name);

        if let Err(cause) = executor.run_hook(hook, &mut self.process) {
            self.state = StartupState::FailedStartup {
                hook_index: index,
                cause: cause.clone(),
            };
            return Err(StartupFailure::Hook {
                index,
                hook: hook.name.clone(),
                cause,
                process: self.process.clone(),
            });
        }
        self.process.completed_hooks.push(hook.name.clone());
        self.state = StartupState::HooksRunning(index + 1);
        Ok(index + 1 < self.config.hooks.len())
    }

    /// Hand control to the entry module once every hook has run
    pub fn activate_entry_point(&mut self, executor: &mut dyn HookExecutor) -> Result<(), StartupFailure> {
        let all_hooks_ran = match self.state {
            StartupState::HooksRunning(next) => next >= self.config.hooks.len(),
            StartupState::SearchPathConfigured => self.config.hooks.is_empty(),
            _ => false,
        };
        if !all_hooks_ran {
            return Err(self.invalid("EntryPointActive"));
        }

        let module = self.config.entry_module.clone();
        executor
            .run_entry_point(&module, &mut self.process)
            .map_err(|cause| StartupFailure::EntryPoint {
                module: module.clone(),
                cause,
            })?;
        self.process.main_module = Some(module);
        self.state = StartupState::EntryPointActive;
        Ok(())
    }

    /// Run the whole sequence
    pub fn run(mut self, executor: &mut dyn HookExecutor) -> Result<ProcessState, StartupFailure> {
        self.configure_search_path()?;
        while self.run_next_hook(executor)? {}
        self.activate_entry_point(executor)?;
        debug!(
            "Startup of '{}' reached {} after {} hook(s)",
            self.config.name,
            self.state,
            self.process.completed_hooks.len()
        );
        Ok(self.process)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::assembler::{ARCHIVE_FILE, BIN_DIR, DATA_DIR};

    fn config(hooks: &[&str]) -> LaunchConfig {
        LaunchConfig {
            name: "app".to_owned(),
            entry_module: "main".to_owned(),
            console: true,
            python_version: "3.12".to_owned(),
            archive: ARCHIVE_FILE.to_owned(),
            bin_dir: BIN_DIR.to_owned(),
            data_dir: DATA_DIR.to_owned(),
            stdlib_dir: "lib/python3.12".to_owned(),
            interpreter: None,
            hooks: hooks
                .iter()
                .enumerate()
                .map(|(index, name)| LaunchHook {
                    index,
                    name: (*name).to_owned(),
                    path: format!("hooks/{index:02}_{name}.py"),
                })
                .collect(),
        }
    }

    /// Sets an environment entry per hook and fails the named one
    #[derive(Default)]
    struct Recorder {
        fail_on: Option<&'static str>,
        ran: Vec<String>,
        entered: bool,
    }

    impl HookExecutor for Recorder {
        fn run_hook(&mut self, hook: &LaunchHook, process: &mut ProcessState) -> Result<(), String> {
            self.ran.push(hook.name.clone());
            if self.fail_on == Some(hook.name.as_str()) {
                return Err("ImportError: no module named 'certifi'".to_owned());
            }
            process
                .environment
                .insert(format!("HOOK_{}", hook.name), "done".to_owned());
            Ok(())
        }

        fn run_entry_point(&mut self, _module: &str, _process: &mut ProcessState) -> Result<(), String> {
            self.entered = true;
            Ok(())
        }
    }

    #[test]
    fn test_hooks_run_in_order_then_entry() -> Result<(), StartupFailure> {
        let config = config(&["A", "B", "C"]);
        let mut recorder = Recorder::default();
        let process = Startup::new(&config, "/bundle/_internal").run(&mut recorder)?;

        assert_eq!(recorder.ran, vec!["A", "B", "C"]);
        assert!(recorder.entered);
        assert_eq!(process.completed_hooks, vec!["A", "B", "C"]);
        assert_eq!(process.main_module.as_deref(), Some("main"));
        assert_eq!(
            process.search_path,
            vec![
                PathBuf::from("/bundle/_internal/modules.kar"),
                PathBuf::from("/bundle/_internal/bin"),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_failing_hook_stops_startup() {
        let config = config(&["A", "B", "C"]);
        let mut recorder = Recorder {
            fail_on: Some("B"),
            ..Recorder::default()
        };
        let mut startup = Startup::new(&config, "/bundle/_internal");
        assert!(startup.configure_search_path().is_ok());
        let mut failure = None;
        loop {
            match startup.run_next_hook(&mut recorder) {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        assert_eq!(recorder.ran, vec!["A", "B"]);
        assert!(!recorder.entered);
        assert_eq!(
            startup.state(),
            &StartupState::FailedStartup {
                hook_index: 1,
                cause: "ImportError: no module named 'certifi'".to_owned(),
            }
        );
        match failure {
            Some(StartupFailure::Hook {
                index,
                hook,
                process,
                ..
            }) => {
                assert_eq!((index, hook.as_str()), (1, "B"));
                assert_eq!(process.completed_hooks, vec!["A"]);
                assert_eq!(process.environment.get("HOOK_A").map(String::as_str), Some("done"));
            }
            other => panic!("expected hook failure, got {other:?}"),
        }

        // terminal: nothing moves on from a failed startup
        assert!(matches!(
            startup.activate_entry_point(&mut recorder),
            Err(StartupFailure::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_no_state_can_be_skipped() {
        let config = config(&["A"]);
        let mut recorder = Recorder::default();

        let mut startup = Startup::new(&config, "/b");
        assert!(matches!(
            startup.run_next_hook(&mut recorder),
            Err(StartupFailure::InvalidTransition { .. })
        ));
        assert!(matches!(
            startup.activate_entry_point(&mut recorder),
            Err(StartupFailure::InvalidTransition { .. })
        ));

        assert!(startup.configure_search_path().is_ok());
        assert!(startup.configure_search_path().is_err());
        // hook A has not run yet
        assert!(startup.activate_entry_point(&mut recorder).is_err());
        assert!(recorder.ran.is_empty());
    }

    #[test]
    fn test_hook_failure_maps_to_execution_failure() {
        let error: BuildError = StartupFailure::Hook {
            index: 2,
            hook: "rthook_qt".to_owned(),
            cause: "boom".to_owned(),
            process: ProcessState::default(),
        }
        .into();
        assert_eq!(error.exit_code(), 6);
        assert_eq!(error.to_string(), "runtime hook #2 'rthook_qt' failed: boom");
    }
}
