//! Action sequencer
//!
//! The state machine behind every automation mode. One cycle locates the
//! current step's control, clicks it, waits for the page to re-render and
//! classifies what happened. Sources decide which step comes next; this
//! module decides what a verdict means.
//!
//! All waiting goes through [`poll_until`] and [`pause`], so a cancelled run
//! stops at its next suspension point and never clicks again.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::classify::{Classify, ClassifyContext, Verdict};
use super::dispatch::Dispatcher;
use super::observer::Trigger;
use super::poll::{pause, poll_until};
use super::source::{NextStep, StepSource};
use crate::config::prefs::FailurePolicy;
use crate::config::settings::Settings;
use crate::dom::text::labels_match;
use crate::dom::{Dom, NodeId, Selector};
use crate::locate::{is_interactable, ControlHandle, Locator, TargetDescriptor};
use crate::pacing::Humanizer;
use crate::page::{Page, PageError};

/// Where the automation loop currently is
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SequencerState {
    #[default]
    Idle,
    Locating,
    ActingOnTarget,
    AwaitingTransition,
    ClassifyingOutcome,
    /// Recovering before replaying; carries the consecutive failure count
    Retrying(u32),
    Stopped(StopReason),
}

impl SequencerState {
    pub fn is_stopped(&self) -> bool {
        matches!(self, SequencerState::Stopped(_))
    }
}

impl fmt::Display for SequencerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequencerState::Idle => f.write_str("idle"),
            SequencerState::Locating => f.write_str("locating"),
            SequencerState::ActingOnTarget => f.write_str("acting"),
            SequencerState::AwaitingTransition => f.write_str("awaiting transition"),
            SequencerState::ClassifyingOutcome => f.write_str("classifying"),
            SequencerState::Retrying(n) => write!(f, "retrying (failure {n})"),
            SequencerState::Stopped(reason) => write!(f, "stopped: {reason}"),
        }
    }
}

/// Why a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The operator stopped it, or a new run replaced it
    User,
    /// Every step or the cycle budget is done
    Completed,
    /// A tracked quality reached its goal
    GoalReached,
    /// A control never appeared
    NotFound(String),
    /// A busy marker never went away
    TimedOut(String),
    /// A challenge failed and the policy says stop
    StoppedOnFailure,
    MaxRetriesExceeded,
    /// The failure screen could not be dismissed
    RecoveryFailed,
    /// Unexpected error or panic inside a cycle
    Fatal(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::User => f.write_str("Stopped by user"),
            StopReason::Completed => f.write_str("All steps completed"),
            StopReason::GoalReached => f.write_str("Goal quality reached"),
            StopReason::NotFound(what) => write!(f, "Could not find {what}"),
            StopReason::TimedOut(what) => write!(f, "Timed out waiting for {what}"),
            StopReason::StoppedOnFailure => f.write_str("Challenge failed; stopping as configured"),
            StopReason::MaxRetriesExceeded => f.write_str("Too many consecutive failures"),
            StopReason::RecoveryFailed => f.write_str("Could not dismiss the failure screen"),
            StopReason::Fatal(e) => write!(f, "Unexpected error: {e}"),
        }
    }
}

/// One status message, emitted on every state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub state: SequencerState,
    pub message: String,
}

/// Receives status messages for an operator display
pub type StatusCallback = Arc<dyn Fn(&StatusUpdate) + Send + Sync>;

/// Result of one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Run the next cycle straight away
    Continue,
    /// Nothing to do until the page changes
    Idle,
    Stopped(StopReason),
}

/// Run-scoped flags shared by the driver, the trigger tasks and the session
pub struct RunControl {
    running: AtomicBool,
    in_flight: AtomicBool,
    cancel: CancellationToken,
    state: Mutex<SequencerState>,
    last_status: Mutex<Option<StatusUpdate>>,
    status: Option<StatusCallback>,
    triggers: mpsc::Sender<Trigger>,
}

impl RunControl {
    /// A running control and the receiving end of its trigger queue
    pub fn new(status: Option<StatusCallback>) -> (Arc<Self>, mpsc::Receiver<Trigger>) {
        let (triggers, rx) = mpsc::channel(1);
        let control = Arc::new(Self {
            running: AtomicBool::new(true),
            in_flight: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            state: Mutex::new(SequencerState::Idle),
            last_status: Mutex::new(None),
            status,
            triggers,
        });
        (control, rx)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn state(&self) -> SequencerState {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_in_flight(&self, in_flight: bool) {
        self.in_flight.store(in_flight, Ordering::SeqCst);
    }

    /// Queue a re-evaluation unless a cycle is in flight or one is queued
    pub fn offer(&self, trigger: Trigger) -> bool {
        if !self.is_running() || self.in_flight.load(Ordering::SeqCst) {
            return false;
        }
        self.triggers.try_send(trigger).is_ok()
    }

    /// Record a non-terminal transition
    pub fn enter(&self, state: SequencerState, message: impl Into<String>) {
        if self.cancel.is_cancelled() {
            return;
        }
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state.clone();
        self.emit(state, message.into());
    }

    /// End the run; only the first caller wins and reports
    pub fn finish(&self, reason: StopReason) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.cancel.cancel();

        let state = SequencerState::Stopped(reason.clone());
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state.clone();
        match &reason {
            StopReason::User | StopReason::Completed | StopReason::GoalReached => {
                log::info!("{}", reason)
            }
            _ => log::warn!("{}", reason),
        }
        self.emit(state, reason.to_string());
        true
    }

    fn emit(&self, state: SequencerState, message: String) {
        let update = StatusUpdate { state, message };
        {
            let mut last = self
                .last_status
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            // Idle re-evaluations repeat themselves
            if last.as_ref() == Some(&update) {
                return;
            }
            *last = Some(update.clone());
        }

        log::debug!("[{}] {}", update.state, update.message);
        if let Some(callback) = &self.status {
            callback(&update);
        }
    }
}

const NO_OUTCOME: &str = "an outcome after the action";

/// Early exit from a cycle
#[derive(Debug, thiserror::Error)]
enum Halt {
    #[error("{0}")]
    Stop(StopReason),
    #[error(transparent)]
    Page(#[from] PageError),
}

/// Drives one run's cycles
pub struct Sequencer {
    page: Arc<dyn Page>,
    locator: Locator,
    classifier: Arc<dyn Classify>,
    dispatcher: Dispatcher,
    humanizer: Humanizer,
    source: Box<dyn StepSource>,
    control: Arc<RunControl>,
    policy: FailurePolicy,
    max_failures: u32,
    max_cycles: u32,
    failures: u32,
    cycles: u32,
}

impl Sequencer {
    pub fn new(
        page: Arc<dyn Page>,
        settings: &Settings,
        classifier: Arc<dyn Classify>,
        source: Box<dyn StepSource>,
        control: Arc<RunControl>,
    ) -> Self {
        Self {
            page,
            locator: Locator::new(settings.profile.clone()),
            classifier,
            dispatcher: Dispatcher::new(settings.automation.highlight_targets),
            humanizer: Humanizer::new(settings.timings.clone()),
            source,
            control,
            policy: settings.automation.on_failure,
            max_failures: settings.automation.max_consecutive_failures.max(1),
            max_cycles: settings.automation.max_cycles,
            failures: 0,
            cycles: 0,
        }
    }

    pub fn control(&self) -> &Arc<RunControl> {
        &self.control
    }

    /// Run one cycle; errors become [`StopReason::Fatal`]
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        match self.cycle().await {
            Ok(outcome) => outcome,
            Err(Halt::Stop(reason)) => CycleOutcome::Stopped(reason),
            Err(Halt::Page(e)) => {
                log::error!("Cycle aborted: {}", e);
                CycleOutcome::Stopped(StopReason::Fatal(e.to_string()))
            }
        }
    }

    async fn cycle(&mut self) -> Result<CycleOutcome, Halt> {
        self.check_cancelled()?;

        let dom = self.page.snapshot();
        let record = match self.source.next(&dom, &self.locator) {
            NextStep::Step(record) => record,
            NextStep::Idle(message) => {
                self.control.enter(SequencerState::Idle, message);
                return Ok(CycleOutcome::Idle);
            }
            NextStep::Exhausted => return Ok(CycleOutcome::Stopped(StopReason::Completed)),
        };
        drop(dom);

        self.control.enter(
            SequencerState::Locating,
            format!("Locating {} ({})", record.target, self.source.describe()),
        );

        let handle = self.locate(&record.target).await?;
        self.control.enter(
            SequencerState::ActingOnTarget,
            format!("Clicking {}", record.target),
        );
        self.click(&handle)?;

        self.control.enter(
            SequencerState::AwaitingTransition,
            "Waiting for the page to update",
        );
        let delay = self.humanizer.transition_delay();
        self.wait(delay).await?;

        if let Some(outfit) = &record.outfit {
            self.switch_outfit(outfit).await?;
        }
        if let Some(busy) = &record.wait_until_gone {
            self.await_absent(busy).await?;
        }

        self.control
            .enter(SequencerState::ClassifyingOutcome, "Checking the outcome");
        match self.await_verdict().await? {
            Verdict::Success => {}
            // Filtered out by `await_verdict`; treated like a timeout if it ever leaks
            Verdict::StillPending => {
                return Err(Halt::Stop(StopReason::NotFound(NO_OUTCOME.to_string())))
            }
            Verdict::GoalReached => return Ok(CycleOutcome::Stopped(StopReason::GoalReached)),
            Verdict::FatalFailure(reason) => {
                return Ok(CycleOutcome::Stopped(StopReason::Fatal(reason)))
            }
            Verdict::RecoverableFailure => return self.on_failure().await,
        }

        if let Some(label) = &record.exit_button_text {
            let exit = self.locate(&TargetDescriptor::exit(label.clone())).await?;
            self.control.enter(
                SequencerState::ActingOnTarget,
                format!("Clicking exit '{label}'"),
            );
            self.click(&exit)?;
            let delay = self.humanizer.transition_delay();
            self.wait(delay).await?;
        }

        self.failures = 0;
        self.cycles += 1;
        self.source.advance();

        if self.max_cycles > 0 && self.cycles >= self.max_cycles {
            return Ok(CycleOutcome::Stopped(StopReason::Completed));
        }
        Ok(CycleOutcome::Continue)
    }

    async fn on_failure(&mut self) -> Result<CycleOutcome, Halt> {
        self.failures += 1;
        log::warn!(
            "Challenge failed ({} consecutive)",
            self.failures
        );

        if self.policy == FailurePolicy::Stop {
            return Ok(CycleOutcome::Stopped(StopReason::StoppedOnFailure));
        }
        if self.failures >= self.max_failures {
            return Ok(CycleOutcome::Stopped(StopReason::MaxRetriesExceeded));
        }

        self.control.enter(
            SequencerState::Retrying(self.failures),
            format!(
                "Challenge failed; retrying ({}/{})",
                self.failures, self.max_failures
            ),
        );
        self.recover().await?;
        self.source.recovered();

        let pause = self.humanizer.retry_pause();
        self.wait(pause).await?;
        // The step was not advanced, so the next cycle replays it
        Ok(CycleOutcome::Continue)
    }

    /// Click the failure screen's exit control
    async fn recover(&mut self) -> Result<(), Halt> {
        let timings = self.humanizer.timings().clone();
        let profile = self.locator.profile();

        let found = poll_until(
            || {
                let dom = self.page.snapshot();
                let controls: Vec<NodeId> = dom
                    .select(&profile.exit_region)
                    .into_iter()
                    .flat_map(|region| self.locator.controls_within(&dom, region))
                    .filter(|&n| is_interactable(&dom, n))
                    .collect();

                profile.recovery_labels.iter().find_map(|wanted| {
                    controls.iter().find_map(|&n| {
                        let label = self.locator.label_of(&dom, n);
                        label
                            .eq_ignore_ascii_case(wanted)
                            .then_some(ControlHandle { node: n, label })
                    })
                })
            },
            timings.recovery_timeout(),
            timings.poll_interval(),
            self.control.cancel_token(),
        )
        .await;

        let Some(exit) = found else {
            self.check_cancelled()?;
            return Err(Halt::Stop(StopReason::RecoveryFailed));
        };

        self.control.enter(
            SequencerState::Retrying(self.failures),
            format!("Dismissing failure screen via '{}'", exit.label),
        );
        self.click(&exit)?;
        let delay = self.humanizer.recovery_delay();
        self.wait(delay).await
    }

    async fn switch_outfit(&mut self, outfit: &str) -> Result<(), Halt> {
        self.control.enter(
            SequencerState::ActingOnTarget,
            format!("Switching outfit to '{outfit}'"),
        );
        let profile = self.locator.profile().clone();

        let trigger = self
            .poll_node(|dom| {
                dom.select(&profile.outfit_trigger)
                    .into_iter()
                    .find(|&n| is_interactable(dom, n))
            })
            .await
            .ok_or_else(|| Halt::Stop(StopReason::NotFound("the outfit selector".to_string())));
        let trigger = match trigger {
            Ok(trigger) => trigger,
            Err(halt) => {
                self.check_cancelled()?;
                return Err(halt);
            }
        };
        self.click(&trigger)?;
        self.wait(self.humanizer.outfit_menu_delay()).await?;

        let option = self
            .poll_node(|dom| {
                dom.select(&profile.outfit_option).into_iter().find(|&n| {
                    is_interactable(dom, n) && labels_match(&self.locator.text_of(dom, n), outfit)
                })
            })
            .await;

        let Some(option) = option else {
            self.check_cancelled()?;
            // Leave the menu closed for the operator
            if is_interactable(&self.page.snapshot(), trigger.node) {
                if let Err(e) = self.click(&trigger) {
                    log::debug!("Could not close outfit menu: {}", e);
                }
            }
            return Err(Halt::Stop(StopReason::NotFound(format!("outfit '{outfit}'"))));
        };

        self.click(&option)?;
        self.wait(self.humanizer.outfit_apply_delay()).await
    }

    async fn await_verdict(&self) -> Result<Verdict, Halt> {
        let expected = self.source.expected_next();
        let timings = self.humanizer.timings();

        let verdict = poll_until(
            || {
                let dom = self.page.snapshot();
                let ctx = ClassifyContext {
                    dom: &dom,
                    locator: &self.locator,
                    expected_next: expected.as_ref(),
                };
                match self.classifier.classify(&ctx) {
                    Verdict::StillPending => None,
                    verdict => Some(verdict),
                }
            },
            timings.settle_timeout(),
            timings.poll_interval(),
            self.control.cancel_token(),
        )
        .await;

        match verdict {
            Some(verdict) => {
                log::info!("Outcome: {}", verdict);
                Ok(verdict)
            }
            None => {
                self.check_cancelled()?;
                Err(Halt::Stop(StopReason::NotFound(NO_OUTCOME.to_string())))
            }
        }
    }

    /// Wait until nothing matching `busy` is left on the page
    async fn await_absent(&self, busy: &Selector) -> Result<(), Halt> {
        self.control.enter(
            SequencerState::AwaitingTransition,
            format!("Waiting for '{busy}' to clear"),
        );
        let timings = self.humanizer.timings();
        let cleared = poll_until(
            || self.page.snapshot().select(busy).is_empty().then_some(()),
            timings.disappear_timeout(),
            timings.poll_interval(),
            self.control.cancel_token(),
        )
        .await;

        match cleared {
            Some(()) => Ok(()),
            None => {
                self.check_cancelled()?;
                Err(Halt::Stop(StopReason::TimedOut(format!("'{busy}' to clear"))))
            }
        }
    }

    /// Locate `target`, polling until it shows up
    async fn locate(&self, target: &TargetDescriptor) -> Result<ControlHandle, Halt> {
        let timings = self.humanizer.timings();
        let found = poll_until(
            || self.locator.locate(&self.page.snapshot(), target),
            timings.element_timeout(),
            timings.poll_interval(),
            self.control.cancel_token(),
        )
        .await;

        match found {
            Some(handle) => Ok(handle),
            None => {
                self.check_cancelled()?;
                Err(Halt::Stop(StopReason::NotFound(target.to_string())))
            }
        }
    }

    async fn poll_node(&self, find: impl Fn(&Dom) -> Option<NodeId>) -> Option<ControlHandle> {
        let timings = self.humanizer.timings();
        poll_until(
            || {
                let dom = self.page.snapshot();
                find(&dom).map(|node| ControlHandle {
                    node,
                    label: self.locator.label_of(&dom, node),
                })
            },
            timings.element_timeout(),
            timings.poll_interval(),
            self.control.cancel_token(),
        )
        .await
    }

    fn click(&self, control: &ControlHandle) -> Result<(), Halt> {
        self.check_cancelled()?;
        self.dispatcher.dispatch(self.page.as_ref(), control)?;
        Ok(())
    }

    async fn wait(&self, duration: std::time::Duration) -> Result<(), Halt> {
        if pause(duration, self.control.cancel_token()).await {
            Ok(())
        } else {
            Err(Halt::Stop(StopReason::User))
        }
    }

    fn check_cancelled(&self) -> Result<(), Halt> {
        if self.control.cancel_token().is_cancelled() {
            Err(Halt::Stop(StopReason::User))
        } else {
            Ok(())
        }
    }
}
