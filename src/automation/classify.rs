//! Outcome classifier
//!
//! Looks at the page after an action has had time to land and decides what
//! happened. The game gives no completion signal, so every verdict is a
//! heuristic over what is currently rendered.

use std::fmt;

use crate::config::settings::ClassifierSettings;
use crate::dom::text::normalize;
use crate::dom::Dom;
use crate::locate::{is_interactable, Locator, TargetDescriptor};

/// Result of inspecting the page after an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The action landed; move on
    Success,
    /// A tracked quality reached its goal; stop the run
    GoalReached,
    /// The game reports a failed challenge that can be dismissed and retried
    RecoverableFailure,
    /// The page is in a state nothing knows how to handle
    FatalFailure(String),
    /// Nothing has rendered yet; look again later
    StillPending,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Success => f.write_str("success"),
            Verdict::GoalReached => f.write_str("goal reached"),
            Verdict::RecoverableFailure => f.write_str("failed challenge"),
            Verdict::FatalFailure(reason) => write!(f, "fatal: {reason}"),
            Verdict::StillPending => f.write_str("pending"),
        }
    }
}

/// What the classifier gets to look at
pub struct ClassifyContext<'a> {
    pub dom: &'a Dom,
    pub locator: &'a Locator,
    /// The control the next step will need, when one is known
    pub expected_next: Option<&'a TargetDescriptor>,
}

/// Strategy seam for outcome classification
pub trait Classify: Send + Sync {
    fn classify(&self, ctx: &ClassifyContext<'_>) -> Verdict;
}

/// Heuristic classifier driven by [`ClassifierSettings`]
#[derive(Debug, Clone)]
pub struct OutcomeClassifier {
    settings: ClassifierSettings,
}

impl OutcomeClassifier {
    pub fn new(settings: ClassifierSettings) -> Self {
        Self { settings }
    }

    fn reports_failure(&self, dom: &Dom) -> bool {
        let phrase = self.settings.failure_phrase.to_lowercase();
        !phrase.is_empty()
            && dom
                .select(&self.settings.outcome_region)
                .into_iter()
                .any(|region| dom.text_content(region).to_lowercase().contains(&phrase))
    }

    fn goal_reached(&self, dom: &Dom) -> bool {
        let Some(goal) = self.settings.goal_quality else {
            return false;
        };

        dom.select(&self.settings.goal_container)
            .into_iter()
            .filter_map(|container| {
                dom.select_within(container, &self.settings.goal_value)
                    .last()
                    .copied()
            })
            .filter_map(|value| normalize(&dom.text_content(value)).parse::<i64>().ok())
            .any(|value| value == goal)
    }

    fn unlucky_title(&self, dom: &Dom) -> bool {
        if !self.settings.failure_titles_enabled {
            return false;
        }

        dom.select(&self.settings.failure_title_selector)
            .into_iter()
            .map(|heading| dom.text_content(heading).to_lowercase())
            .any(|title| {
                self.settings
                    .failure_titles
                    .iter()
                    .any(|fragment| title.contains(&fragment.to_lowercase()))
            })
    }

    fn settled(&self, dom: &Dom) -> bool {
        dom.select(&self.settings.settled_markers)
            .into_iter()
            .any(|marker| is_interactable(dom, marker))
    }
}

impl Classify for OutcomeClassifier {
    fn classify(&self, ctx: &ClassifyContext<'_>) -> Verdict {
        let dom = ctx.dom;

        if self.reports_failure(dom) {
            return Verdict::RecoverableFailure;
        }
        if self.goal_reached(dom) {
            return Verdict::GoalReached;
        }
        if self.unlucky_title(dom) {
            log::warn!("Treating unlucky result heading as a failure");
            return Verdict::RecoverableFailure;
        }

        let next_missing = ctx
            .expected_next
            .is_some_and(|next| ctx.locator.locate(dom, next).is_none());
        if !self.settled(dom) && next_missing {
            return Verdict::StillPending;
        }

        Verdict::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::LocatorProfile;
    use crate::dom::ElementBuilder;

    fn classify(settings: ClassifierSettings, dom: &Dom, next: Option<&TargetDescriptor>) -> Verdict {
        let locator = Locator::new(LocatorProfile::default());
        OutcomeClassifier::new(settings).classify(&ClassifyContext {
            dom,
            locator: &locator,
            expected_next: next,
        })
    }

    fn result_region(text: &str) -> ElementBuilder {
        ElementBuilder::new("div")
            .class("media--quality-updates")
            .child(ElementBuilder::new("p").text(text))
    }

    #[test]
    fn test_failure_phrase() {
        let mut dom = Dom::new();
        let root = dom.root();
        dom.append(root, result_region("You've Failed in a challenge of Shadowy!"));

        assert_eq!(
            classify(ClassifierSettings::default(), &dom, None),
            Verdict::RecoverableFailure
        );
    }

    #[test]
    fn test_pending_until_next_control_or_marker() {
        let mut dom = Dom::new();
        let root = dom.root();
        dom.append(root, result_region("You succeeded."));
        let next = TargetDescriptor::titled("Go to market", "Go");

        assert_eq!(
            classify(ClassifierSettings::default(), &dom, Some(&next)),
            Verdict::StillPending
        );

        dom.append(
            root,
            ElementBuilder::new("div")
                .class("storylet")
                .child(ElementBuilder::new("h2").text("Go to market"))
                .child(ElementBuilder::new("button").text("Go")),
        );
        assert_eq!(
            classify(ClassifierSettings::default(), &dom, Some(&next)),
            Verdict::Success
        );
    }

    #[test]
    fn test_settled_marker_means_success() {
        let mut dom = Dom::new();
        let root = dom.root();
        dom.append(
            root,
            ElementBuilder::new("div")
                .class("buttons--storylet-exit-options")
                .child(ElementBuilder::new("button").text("Onwards")),
        );
        let next = TargetDescriptor::titled("Elsewhere", "Go");

        assert_eq!(
            classify(ClassifierSettings::default(), &dom, Some(&next)),
            Verdict::Success
        );
    }

    #[test]
    fn test_goal_quality() {
        let mut dom = Dom::new();
        let root = dom.root();
        dom.append(
            root,
            ElementBuilder::new("div").class("quality-update__body").child(
                ElementBuilder::new("div")
                    .class("progress")
                    .child(ElementBuilder::new("span").class("progress__current").text("4"))
                    .child(ElementBuilder::new("span").class("progress__current").text("5")),
            ),
        );

        let settings = ClassifierSettings {
            goal_quality: Some(5),
            ..Default::default()
        };
        assert_eq!(classify(settings, &dom, None), Verdict::GoalReached);

        let settings = ClassifierSettings {
            goal_quality: Some(4),
            ..Default::default()
        };
        assert_eq!(classify(settings, &dom, None), Verdict::Success);
    }

    #[test]
    fn test_failure_titles_off_by_default() {
        let mut dom = Dom::new();
        let root = dom.root();
        dom.append(
            root,
            ElementBuilder::new("div")
                .class("media--root")
                .child(ElementBuilder::new("h1").class("storylet-root__heading").text("A Setback!")),
        );

        assert_eq!(classify(ClassifierSettings::default(), &dom, None), Verdict::Success);

        let settings = ClassifierSettings {
            failure_titles_enabled: true,
            ..Default::default()
        };
        assert_eq!(classify(settings, &dom, None), Verdict::RecoverableFailure);
    }
}
