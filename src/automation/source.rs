//! Step sources
//!
//! The sequencer's "Locating" phase asks a source for the next step. Sequence
//! mode replays a recording verbatim; the loop modes derive each step from
//! what the page currently offers.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::rules::{CardAction, CycleConfig};
use crate::config::settings::{BranchProfile, CardProfile, EquipProfile};
use crate::dom::text::labels_match;
use crate::dom::{Dom, NodeId, Selector};
use crate::locate::{is_interactable, Locator, TargetDescriptor};

/// One replayable step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    #[serde(flatten)]
    pub target: TargetDescriptor,
    /// Outfit to switch to after the click
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outfit: Option<String>,
    /// Exit control to click once the step succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_button_text: Option<String>,
    /// Busy marker that must leave the page before the outcome is judged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_until_gone: Option<Selector>,
    /// Markup of the control when it was recorded
    #[serde(
        default,
        rename = "debug_element_html",
        skip_serializing_if = "Option::is_none"
    )]
    pub debug_html: Option<String>,
}

impl ActionRecord {
    /// A bare click on `target`
    pub fn click(target: TargetDescriptor) -> Self {
        Self {
            target,
            outfit: None,
            exit_button_text: None,
            wait_until_gone: None,
            debug_html: None,
        }
    }

    pub fn with_outfit(mut self, outfit: impl Into<String>) -> Self {
        self.outfit = Some(outfit.into());
        self
    }

    pub fn with_exit(mut self, label: impl Into<String>) -> Self {
        self.exit_button_text = Some(label.into());
        self
    }

    pub fn with_wait_until_gone(mut self, busy: Selector) -> Self {
        self.wait_until_gone = Some(busy);
        self
    }
}

/// What the sequencer should do next
#[derive(Debug, Clone, PartialEq)]
pub enum NextStep {
    /// Perform this step
    Step(ActionRecord),
    /// Nothing to do on the current page; wait for it to change
    Idle(String),
    /// Every step has been performed
    Exhausted,
}

/// Chooses the step each cycle acts on
pub trait StepSource: Send + Sync {
    /// The current step; repeated until [`advance`](Self::advance) is called
    fn next(&mut self, dom: &Dom, locator: &Locator) -> NextStep;

    /// The current step succeeded
    fn advance(&mut self);

    /// Target of the step after the current one, when already known
    fn expected_next(&self) -> Option<TargetDescriptor> {
        None
    }

    /// A failure screen was dismissed; the page has moved on
    fn recovered(&mut self) {}

    /// Short description for status messages
    fn describe(&self) -> String;
}

/// Replays recorded steps in order
#[derive(Debug, Clone)]
pub struct SequenceSource {
    records: Vec<ActionRecord>,
    position: usize,
}

impl SequenceSource {
    pub fn new(records: Vec<ActionRecord>) -> Self {
        Self {
            records,
            position: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl StepSource for SequenceSource {
    fn next(&mut self, _dom: &Dom, _locator: &Locator) -> NextStep {
        match self.records.get(self.position) {
            Some(record) => NextStep::Step(record.clone()),
            None => NextStep::Exhausted,
        }
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn expected_next(&self) -> Option<TargetDescriptor> {
        self.records
            .get(self.position + 1)
            .map(|record| record.target.clone())
    }

    fn describe(&self) -> String {
        format!("step {}/{}", self.position + 1, self.records.len())
    }
}

/// Loop mode over ranked branches
#[derive(Debug, Clone)]
pub struct BranchPrioritySource {
    profile: BranchProfile,
    /// Labels that also count as "leave the result screen"
    exit_labels: Vec<String>,
}

impl BranchPrioritySource {
    pub fn new(profile: BranchProfile, recovery_labels: &[String]) -> Self {
        let mut exit_labels = vec![profile.exit_label.clone()];
        exit_labels.extend(recovery_labels.iter().cloned());
        Self {
            profile,
            exit_labels,
        }
    }

    fn rank(&self, dom: &Dom, locator: &Locator) -> Option<(i32, String)> {
        let mut candidates: Vec<(i32, String)> = dom
            .select(&self.profile.branch)
            .into_iter()
            .filter_map(|branch| {
                let title_el = dom.select_within(branch, &self.profile.title).first().copied()?;
                let title = locator.text_of(dom, title_el);
                let go = dom.select_within(branch, &self.profile.go_button).first().copied()?;
                if !usable(dom, go) {
                    return None;
                }
                let target = self.profile.targets.iter().find(|t| t.title == title)?;
                Some((target.priority, title))
            })
            .collect();

        // Stable, so equal priorities keep document order
        candidates.sort_by(|a, b| b.0.cmp(&a.0));
        candidates.into_iter().next()
    }

    fn stray_exit(&self, dom: &Dom, locator: &Locator) -> Option<String> {
        let region = &locator.profile().exit_region;
        dom.select(region)
            .into_iter()
            .flat_map(|r| locator.controls_within(dom, r))
            .filter(|&n| is_interactable(dom, n))
            .map(|n| locator.label_of(dom, n))
            .find(|label| self.exit_labels.iter().any(|l| l.eq_ignore_ascii_case(label)))
    }
}

impl StepSource for BranchPrioritySource {
    fn next(&mut self, dom: &Dom, locator: &Locator) -> NextStep {
        if let Some((priority, title)) = self.rank(dom, locator) {
            log::info!("Best branch: '{}' (priority {})", title, priority);
            let record = ActionRecord::click(TargetDescriptor::titled(title, &self.profile.go_label))
                .with_exit(&self.profile.exit_label);
            return NextStep::Step(record);
        }

        // Left on a result screen, e.g. after a manual click
        if let Some(label) = self.stray_exit(dom, locator) {
            log::info!("No branch ranked; leaving result screen via '{}'", label);
            return NextStep::Step(ActionRecord::click(TargetDescriptor::exit(label)));
        }

        NextStep::Idle("No target branch available".to_string())
    }

    fn advance(&mut self) {}

    fn describe(&self) -> String {
        format!("{} ranked branch(es)", self.profile.targets.len())
    }
}

/// Loop mode over opportunity cards
#[derive(Debug, Clone)]
pub struct CardRuleSource {
    rules: CycleConfig,
    profile: CardProfile,
    pending: VecDeque<ActionRecord>,
}

impl CardRuleSource {
    pub fn new(rules: CycleConfig, profile: CardProfile) -> Self {
        Self {
            rules,
            profile,
            pending: VecDeque::new(),
        }
    }

    fn within_card(&self, selector: &Selector, event_id: &str) -> Option<Selector> {
        let scope = format!("[{}=\"{}\"]", self.profile.event_attribute, event_id);
        selector
            .scoped_to(&scope)
            .map_err(|e| log::warn!("Cannot address card {}: {}", event_id, e))
            .ok()
    }

    fn plan(&mut self, dom: &Dom) -> Option<String> {
        for card in dom.select(&self.profile.card) {
            let Some(event_id) = dom
                .element(card)
                .and_then(|el| el.attr(&self.profile.event_attribute))
            else {
                continue;
            };
            let Some(rule) = self.rules.rule(event_id) else {
                continue;
            };

            match rule.action {
                CardAction::Play => {
                    let (Some(branch), Some(face)) = (
                        rule.branch.clone(),
                        self.within_card(&self.profile.card_face, event_id),
                    ) else {
                        continue;
                    };
                    let mut open = ActionRecord::click(TargetDescriptor::BySelectorFallback {
                        selector: face,
                        label: rule.description.clone(),
                    });
                    open.outfit = rule.outfit.clone();
                    let mut choose = ActionRecord::click(branch);
                    choose.exit_button_text = rule.exit_button_text.clone();
                    self.pending.extend([open, choose]);
                }
                CardAction::Discard => {
                    let Some(discard) = self.within_card(&self.profile.discard_button, event_id)
                    else {
                        continue;
                    };
                    self.pending
                        .push_back(ActionRecord::click(TargetDescriptor::BySelectorFallback {
                            selector: discard,
                            label: "Discard".to_string(),
                        }));
                }
            }
            return Some(format!("{}: {}", capitalize(&rule.action.to_string()), rule.description));
        }

        let deck = dom
            .select(&self.profile.deck)
            .into_iter()
            .find(|&d| usable(dom, d))?;
        self.pending
            .push_back(ActionRecord::click(TargetDescriptor::BySelectorFallback {
                selector: self.profile.deck.clone(),
                label: plain_label(dom, deck),
            }));
        Some("No actionable cards. Drawing".to_string())
    }
}

impl StepSource for CardRuleSource {
    fn next(&mut self, dom: &Dom, _locator: &Locator) -> NextStep {
        if let Some(step) = self.pending.front() {
            return NextStep::Step(step.clone());
        }

        let hand_visible = dom
            .select(&self.profile.hand)
            .into_iter()
            .any(|hand| is_interactable(dom, hand));
        if !hand_visible {
            return NextStep::Idle("Not on the story tab".to_string());
        }

        match self.plan(dom) {
            Some(summary) => {
                log::info!("{}", summary);
                match self.pending.front() {
                    Some(step) => NextStep::Step(step.clone()),
                    None => NextStep::Idle("Nothing to do".to_string()),
                }
            }
            None => NextStep::Idle("No actionable cards and the deck is empty".to_string()),
        }
    }

    fn advance(&mut self) {
        self.pending.pop_front();
    }

    fn expected_next(&self) -> Option<TargetDescriptor> {
        self.pending.get(1).map(|record| record.target.clone())
    }

    fn recovered(&mut self) {
        // The card is spent either way; start again from the hand
        self.pending.clear();
    }

    fn describe(&self) -> String {
        format!("{} card rule(s)", self.rules.len())
    }
}

/// Steps of the equip script, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EquipStep {
    OpenPossessions,
    OpenCategory,
    PickCategory,
    EquipHighest,
    ReturnToStory,
    Done,
}

impl EquipStep {
    fn after(self) -> Self {
        match self {
            EquipStep::OpenPossessions => EquipStep::OpenCategory,
            EquipStep::OpenCategory => EquipStep::PickCategory,
            EquipStep::PickCategory => EquipStep::EquipHighest,
            EquipStep::EquipHighest => EquipStep::ReturnToStory,
            EquipStep::ReturnToStory | EquipStep::Done => EquipStep::Done,
        }
    }
}

/// Fixed script: equip the best items for one quality, then return
///
/// Opens the possessions page, switches the item category to the quality
/// unless it is already showing, clicks "Equip Highest", waits for every
/// slot to finish changing and goes back to the story.
#[derive(Debug, Clone)]
pub struct EquipHighestSource {
    profile: EquipProfile,
    quality: String,
    step: EquipStep,
}

impl EquipHighestSource {
    pub fn new(profile: EquipProfile, quality: impl Into<String>) -> Self {
        Self {
            profile,
            quality: quality.into(),
            step: EquipStep::OpenPossessions,
        }
    }

    pub fn quality(&self) -> &str {
        &self.quality
    }

    fn target(&self, step: EquipStep) -> Option<TargetDescriptor> {
        let (selector, label) = match step {
            EquipStep::OpenPossessions => (&self.profile.possessions_link, "Possessions"),
            // Labelled with the live category in `next`
            EquipStep::OpenCategory => (&self.profile.category_control, ""),
            EquipStep::PickCategory => (&self.profile.category_option, self.quality.as_str()),
            EquipStep::EquipHighest => (&self.profile.equip_button, self.profile.equip_label.as_str()),
            EquipStep::ReturnToStory => (&self.profile.story_link, "Story"),
            EquipStep::Done => return None,
        };
        Some(TargetDescriptor::BySelectorFallback {
            selector: selector.clone(),
            label: label.to_string(),
        })
    }

    fn category_shown(&self, dom: &Dom, locator: &Locator) -> Option<String> {
        let value = dom.select(&self.profile.category_value).first().copied()?;
        Some(locator.text_of(dom, value))
    }
}

impl StepSource for EquipHighestSource {
    fn next(&mut self, dom: &Dom, locator: &Locator) -> NextStep {
        if self.step == EquipStep::OpenCategory
            && self
                .category_shown(dom, locator)
                .is_some_and(|shown| labels_match(&shown, &self.quality))
        {
            log::info!("Category already shows '{}'", self.quality);
            self.step = EquipStep::EquipHighest;
        }

        let Some(mut target) = self.target(self.step) else {
            return NextStep::Exhausted;
        };
        if self.step == EquipStep::OpenCategory {
            if let TargetDescriptor::BySelectorFallback { selector, label } = &mut target {
                if let Some(&control) = dom.select(selector).first() {
                    *label = locator.label_of(dom, control);
                }
            }
        }

        let record = ActionRecord::click(target);
        if self.step == EquipStep::EquipHighest {
            return NextStep::Step(record.with_wait_until_gone(self.profile.changing_slot.clone()));
        }
        NextStep::Step(record)
    }

    fn advance(&mut self) {
        self.step = self.step.after();
    }

    fn expected_next(&self) -> Option<TargetDescriptor> {
        match self.step {
            // The category may already be right; the equip button marks the page as loaded
            EquipStep::OpenPossessions => self.target(EquipStep::EquipHighest),
            step => self.target(step.after()),
        }
    }

    fn describe(&self) -> String {
        format!("equip highest for '{}'", self.quality)
    }
}

/// Visible and not disabled
fn usable(dom: &Dom, node: NodeId) -> bool {
    is_interactable(dom, node) && dom.element(node).is_some_and(|el| !el.disabled)
}

fn plain_label(dom: &Dom, node: NodeId) -> String {
    crate::dom::text::normalize_label(&dom.text_content(node))
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
