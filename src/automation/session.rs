//! Automation session
//!
//! The control surface a host UI drives: load a rule file, start, stop, ask
//! whether a run is active, and receive a status message on every
//! transition. A session owns at most one run; starting again first stops
//! the previous run and aborts every task it spawned.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::classify::{Classify, OutcomeClassifier};
use super::observer::{spawn_mutation_watcher, spawn_ticker, Trigger};
use super::sequencer::{
    CycleOutcome, RunControl, Sequencer, SequencerState, StatusCallback, StatusUpdate, StopReason,
};
use super::source::{
    BranchPrioritySource, CardRuleSource, EquipHighestSource, SequenceSource, StepSource,
};
use crate::config::prefs::{FailurePolicy, PreferenceStore, PrefsError};
use crate::config::rules::LoadedConfig;
use crate::config::settings::Settings;
use crate::page::Page;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("No configuration loaded")]
    NoConfiguration,
    #[error("Failed to save preference: {0}")]
    Prefs(#[from] PrefsError),
}

struct ActiveRun {
    control: Arc<RunControl>,
    tasks: Vec<JoinHandle<()>>,
}

/// One automation session over one page
///
/// Runs are spawned onto the current tokio runtime, so `start` must be
/// called from within one.
pub struct Session {
    page: Arc<dyn Page>,
    settings: Settings,
    classifier: Arc<dyn Classify>,
    prefs: Option<Arc<dyn PreferenceStore>>,
    policy: FailurePolicy,
    config: Option<LoadedConfig>,
    status: Option<StatusCallback>,
    run: Option<ActiveRun>,
}

impl Session {
    pub fn new(page: Arc<dyn Page>, settings: Settings) -> Self {
        let classifier = Arc::new(OutcomeClassifier::new(settings.classifier.clone()));
        let policy = settings.automation.on_failure;
        Self {
            page,
            settings,
            classifier,
            prefs: None,
            policy,
            config: None,
            status: None,
            run: None,
        }
    }

    /// Replace the outcome classifier
    pub fn with_classifier(mut self, classifier: Arc<dyn Classify>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Read the failure policy from `store` and persist changes to it
    pub fn with_preferences(mut self, store: Arc<dyn PreferenceStore>) -> Self {
        self.policy = FailurePolicy::load(store.as_ref());
        self.prefs = Some(store);
        self
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Change the failure policy; applies to the next run
    pub fn set_failure_policy(&mut self, policy: FailurePolicy) -> Result<(), SessionError> {
        self.policy = policy;
        if let Some(store) = &self.prefs {
            policy.save(store.as_ref())?;
        }
        Ok(())
    }

    /// Register the status display
    pub fn on_status(&mut self, callback: impl Fn(&StatusUpdate) + Send + Sync + 'static) {
        self.status = Some(Arc::new(callback));
    }

    /// Use `config` for the next [`start`](Self::start)
    pub fn load(&mut self, config: LoadedConfig) {
        log::info!("Configuration loaded: {}", config);
        self.config = Some(config);
    }

    pub fn config(&self) -> Option<&LoadedConfig> {
        self.config.as_ref()
    }

    /// Start a run over the loaded configuration
    pub fn start(&mut self) -> Result<(), SessionError> {
        let source: Box<dyn StepSource> = match &self.config {
            Some(config) if config.is_empty() => return Err(SessionError::NoConfiguration),
            None => return Err(SessionError::NoConfiguration),
            Some(LoadedConfig::Cycle(rules)) => Box::new(CardRuleSource::new(
                rules.clone(),
                self.settings.cards.clone(),
            )),
            Some(LoadedConfig::Recording(records)) => {
                Box::new(SequenceSource::new(records.clone()))
            }
        };
        self.start_with(source);
        Ok(())
    }

    /// Start the ranked-branch loop from the settings' branch targets
    pub fn start_branch_loop(&mut self) -> Result<(), SessionError> {
        if self.settings.branches.targets.is_empty() {
            return Err(SessionError::NoConfiguration);
        }
        let source = BranchPrioritySource::new(
            self.settings.branches.clone(),
            &self.settings.profile.recovery_labels,
        );
        self.start_with(Box::new(source));
        Ok(())
    }

    /// Equip the best items for `quality`, then return to the story
    pub fn start_equip_highest(&mut self, quality: &str) -> Result<(), SessionError> {
        let quality = quality.trim();
        if quality.is_empty() {
            return Err(SessionError::NoConfiguration);
        }
        let source = EquipHighestSource::new(self.settings.equip.clone(), quality);
        self.start_with(Box::new(source));
        Ok(())
    }

    /// Start a run over any step source, replacing the current run
    pub fn start_with(&mut self, source: Box<dyn StepSource>) {
        self.stop();

        let mut settings = self.settings.clone();
        settings.automation.on_failure = self.policy;

        let (control, triggers) = RunControl::new(self.status.clone());
        log::info!("Starting automation: {}", source.describe());
        let sequencer = Sequencer::new(
            self.page.clone(),
            &settings,
            self.classifier.clone(),
            source,
            control.clone(),
        );

        let mut tasks = vec![tokio::spawn(drive(sequencer, triggers))];
        if settings.automation.watch_mutations {
            tasks.push(spawn_mutation_watcher(
                self.page.changes(),
                settings.timings.mutation_debounce(),
                control.clone(),
            ));
        }
        if settings.automation.periodic_ticks {
            tasks.push(spawn_ticker(settings.timings.tick_interval(), control.clone()));
        }

        self.run = Some(ActiveRun { control, tasks });
    }

    /// Stop the current run, if any; its final state stays observable
    pub fn stop(&mut self) {
        if let Some(run) = &mut self.run {
            run.control.finish(StopReason::User);
            for task in run.tasks.drain(..) {
                task.abort();
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.run
            .as_ref()
            .is_some_and(|run| run.control.is_running())
    }

    /// Ask the current run to re-evaluate the page
    ///
    /// Returns `false` when there is no run, a cycle is in flight, or a
    /// re-evaluation is already queued.
    pub fn notify(&self, trigger: Trigger) -> bool {
        self.run
            .as_ref()
            .is_some_and(|run| run.control.offer(trigger))
    }

    /// State of the current or most recent run
    pub fn state(&self) -> SequencerState {
        self.run
            .as_ref()
            .map(|run| run.control.state())
            .unwrap_or_default()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The single consumer of a run's trigger queue
async fn drive(mut sequencer: Sequencer, mut triggers: mpsc::Receiver<Trigger>) {
    let control = sequencer.control().clone();

    loop {
        if control.cancel_token().is_cancelled() {
            return;
        }

        control.set_in_flight(true);
        // Anything queued so far is answered by this cycle
        while triggers.try_recv().is_ok() {}

        let outcome = match AssertUnwindSafe(sequencer.run_cycle()).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                log::error!("Cycle panicked: {}", message);
                CycleOutcome::Stopped(StopReason::Fatal(message))
            }
        };
        control.set_in_flight(false);

        match outcome {
            CycleOutcome::Continue => {}
            CycleOutcome::Idle => {
                tokio::select! {
                    _ = control.cancel_token().cancelled() => return,
                    trigger = triggers.recv() => match trigger {
                        Some(trigger) => log::debug!("Re-evaluating after {:?}", trigger),
                        None => return,
                    },
                }
            }
            CycleOutcome::Stopped(reason) => {
                control.finish(reason);
                return;
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_string())
}
