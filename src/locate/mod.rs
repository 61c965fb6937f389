//! Element locator
//!
//! Resolves a [`TargetDescriptor`] against the current document. Resolution
//! never fails loudly: anything that does not pass every filter is simply
//! not found, and the caller decides whether to poll again.

pub mod target;
pub mod visibility;

use crate::config::settings::LocatorProfile;
use crate::dom::text::{control_label, labels_match, normalize, visible_text};
use crate::dom::{Dom, NodeId, Selector};

pub use target::{ContainerHint, StableKey, TargetDescriptor, TargetError};
pub use visibility::is_interactable;

/// Headings are compared on this many leading characters
pub const TITLE_HINT_LEN: usize = 150;

/// Leading characters of normalized text that identify a block
pub fn title_hint(text: &str) -> String {
    normalize(text).chars().take(TITLE_HINT_LEN).collect()
}

/// A resolved, currently interactable control
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlHandle {
    pub node: NodeId,
    /// Normalized label as read at resolution time
    pub label: String,
}

/// Resolves descriptors using a locator profile
#[derive(Debug, Clone)]
pub struct Locator {
    profile: LocatorProfile,
}

impl Locator {
    pub fn new(profile: LocatorProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &LocatorProfile {
        &self.profile
    }

    /// Resolve `target`, or `None` when nothing passes all filters
    pub fn locate(&self, dom: &Dom, target: &TargetDescriptor) -> Option<ControlHandle> {
        match target {
            TargetDescriptor::ByContainerAndLabel { container, label } => match container {
                ContainerHint::Titled(title) => self.by_title(dom, title, label),
                ContainerHint::Marker(selector) => self.by_marker(dom, selector, label),
                ContainerHint::ExitRegion => self.by_marker(dom, &self.profile.exit_region, label),
            },
            TargetDescriptor::ByStableId { key, label } => self.by_stable_id(dom, key, label),
            TargetDescriptor::BySelectorFallback { selector, label } => {
                self.by_selector(dom, selector, label)
            }
        }
    }

    /// Label of a control, as the locator compares it
    pub fn label_of(&self, dom: &Dom, node: NodeId) -> String {
        control_label(dom, node, &self.profile.overlays)
    }

    /// Text of any element with translation overlays removed
    pub fn text_of(&self, dom: &Dom, node: NodeId) -> String {
        visible_text(dom, node, &self.profile.overlays)
    }

    /// Controls under `scope`, in document order
    pub fn controls_within(&self, dom: &Dom, scope: NodeId) -> Vec<NodeId> {
        dom.select_within(scope, &self.profile.controls)
    }

    /// First interactable control under `scope` whose label matches
    pub fn labelled_control(&self, dom: &Dom, scope: NodeId, label: &str) -> Option<ControlHandle> {
        self.controls_within(dom, scope)
            .into_iter()
            .filter(|&n| is_interactable(dom, n))
            .map(|n| self.handle(dom, n))
            .find(|handle| labels_match(&handle.label, label))
    }

    fn handle(&self, dom: &Dom, node: NodeId) -> ControlHandle {
        ControlHandle {
            node,
            label: self.label_of(dom, node),
        }
    }

    fn by_title(&self, dom: &Dom, title: &str, label: &str) -> Option<ControlHandle> {
        let title = title_hint(title);

        dom.select(&self.profile.headings)
            .into_iter()
            .filter(|&h| is_interactable(dom, h) && title_hint(&self.text_of(dom, h)) == title)
            .filter_map(|h| dom.closest(h, &self.profile.containers))
            .find_map(|container| self.labelled_control(dom, container, label))
    }

    fn by_marker(&self, dom: &Dom, selector: &Selector, label: &str) -> Option<ControlHandle> {
        dom.select(selector)
            .into_iter()
            .find_map(|container| self.labelled_control(dom, container, label))
    }

    fn by_stable_id(&self, dom: &Dom, key: &StableKey, label: &str) -> Option<ControlHandle> {
        let found = match key {
            StableKey::ElementId(id) => dom.find_by_id(id),
            StableKey::Attribute { name, value } => dom.find_by_attr(name, value),
        }?;

        if self.profile.controls.matches(dom, found) {
            if !is_interactable(dom, found) {
                return None;
            }
            let handle = self.handle(dom, found);
            if !label.is_empty() && !labels_match(&handle.label, label) {
                // The identifier wins over changed game text
                log::debug!(
                    "Stable id resolved to '{}' while '{}' was expected",
                    handle.label,
                    label
                );
            }
            return Some(handle);
        }

        // The identifier names a block; only the labelled control inside it will do
        self.labelled_control(dom, found, label)
    }

    fn by_selector(&self, dom: &Dom, selector: &Selector, label: &str) -> Option<ControlHandle> {
        let matches = dom.select(selector);

        if let Some(handle) = matches
            .iter()
            .filter(|&&n| is_interactable(dom, n))
            .map(|&n| self.handle(dom, n))
            .find(|handle| labels_match(&handle.label, label))
        {
            return Some(handle);
        }

        // Last resort: a lone structural match is taken whatever it says
        match matches.as_slice() {
            [only] if is_interactable(dom, *only) => Some(self.handle(dom, *only)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::ElementBuilder;

    fn locator() -> Locator {
        Locator::new(LocatorProfile::default())
    }

    fn storylet(title: &str, button: ElementBuilder) -> ElementBuilder {
        ElementBuilder::new("div")
            .class("storylet")
            .child(ElementBuilder::new("h2").text(title))
            .child(button)
    }

    #[test]
    fn test_titled_block_skips_container_without_visible_button() {
        let mut dom = Dom::new();
        let root = dom.root();
        dom.append(
            root,
            storylet("Go to market", ElementBuilder::new("button").id("first").text("Go").hidden()),
        );
        dom.append(
            root,
            storylet("Go to market", ElementBuilder::new("button").id("second").text("Go")),
        );

        let found = locator()
            .locate(&dom, &TargetDescriptor::titled("Go to market", "Go"))
            .unwrap();
        assert_eq!(Some(found.node), dom.find_by_id("second"));
        assert_eq!(found.label, "Go");
    }

    #[test]
    fn test_titled_block_never_returns_wrong_label() {
        let mut dom = Dom::new();
        let root = dom.root();
        dom.append(
            root,
            storylet("Go to market", ElementBuilder::new("button").text("Leave")),
        );

        assert_eq!(
            locator().locate(&dom, &TargetDescriptor::titled("Go to market", "Go")),
            None
        );
    }

    #[test]
    fn test_stable_id_wins_over_label() {
        let mut dom = Dom::new();
        let root = dom.root();
        dom.append(root, ElementBuilder::new("button").id("sell").text("Sell all (4)"));

        let target = TargetDescriptor::ByStableId {
            key: StableKey::ElementId("sell".to_string()),
            label: "Sell".to_string(),
        };
        let found = locator().locate(&dom, &target).unwrap();
        assert_eq!(found.label, "Sell all");
    }

    #[test]
    fn test_branch_id_container() {
        let mut dom = Dom::new();
        let root = dom.root();
        dom.append(
            root,
            ElementBuilder::new("div")
                .attr("data-branch-id", "77")
                .child(ElementBuilder::new("h2").text("Haul water"))
                .child(ElementBuilder::new("button").id("help").text("?"))
                .child(ElementBuilder::new("button").id("go").text("Go")),
        );

        let target: TargetDescriptor =
            serde_json::from_str(r#"{"type":"branch_button","branchId":"77","buttonText":"Go"}"#)
                .unwrap();
        let found = locator().locate(&dom, &target).unwrap();
        assert_eq!(Some(found.node), dom.find_by_id("go"));
    }

    #[test]
    fn test_branch_id_requires_matching_label() {
        let mut dom = Dom::new();
        let root = dom.root();
        dom.append(
            root,
            ElementBuilder::new("div")
                .attr("data-branch-id", "77")
                .child(ElementBuilder::new("h2").text("Haul water"))
                .child(
                    ElementBuilder::new("button")
                        .id("help")
                        .class("buttonlet")
                        .text("?"),
                )
                .child(ElementBuilder::new("button").id("locked").text("Go (locked)").disabled()),
        );

        let target = TargetDescriptor::ByStableId {
            key: StableKey::Attribute {
                name: "data-branch-id".to_string(),
                value: "77".to_string(),
            },
            label: "Go".to_string(),
        };
        assert_eq!(locator().locate(&dom, &target), None);
    }

    #[test]
    fn test_title_is_not_matched_by_prefix() {
        let mut dom = Dom::new();
        let root = dom.root();
        dom.append(
            root,
            storylet(
                "Sneak up on thieving urchins at night",
                ElementBuilder::new("button").id("wrong").text("Go"),
            ),
        );
        dom.append(
            root,
            storylet(
                "Sneak up on thieving urchins",
                ElementBuilder::new("button").id("right").text("Go"),
            ),
        );

        let found = locator()
            .locate(&dom, &TargetDescriptor::titled("Sneak up on thieving urchins", "Go"))
            .unwrap();
        assert_eq!(Some(found.node), dom.find_by_id("right"));
    }

    #[test]
    fn test_long_titles_compare_on_leading_characters() {
        let heading = "The Neath ".repeat(20);
        let mut dom = Dom::new();
        let root = dom.root();
        dom.append(
            root,
            storylet(&heading, ElementBuilder::new("button").id("go").text("Go")),
        );

        let recorded = title_hint(&heading);
        assert_eq!(recorded.chars().count(), TITLE_HINT_LEN);
        let found = locator()
            .locate(&dom, &TargetDescriptor::titled(&recorded, "Go"))
            .unwrap();
        assert_eq!(Some(found.node), dom.find_by_id("go"));
    }

    #[test]
    fn test_selector_fallback_leniency() {
        let mut dom = Dom::new();
        let root = dom.root();
        dom.append(root, ElementBuilder::new("button").class("deck").text("Draw a card"));

        let target = TargetDescriptor::BySelectorFallback {
            selector: Selector::parse("button.deck").unwrap(),
            label: "Deck".to_string(),
        };
        assert!(locator().locate(&dom, &target).is_some());

        dom.append(root, ElementBuilder::new("button").class("deck").text("Other deck"));
        assert_eq!(locator().locate(&dom, &target), None);
    }

    #[test]
    fn test_locate_is_idempotent() {
        let mut dom = Dom::new();
        let root = dom.root();
        dom.append(root, storylet("A", ElementBuilder::new("button").text("Go")));
        dom.append(root, storylet("A", ElementBuilder::new("button").text("Go")));

        let target = TargetDescriptor::titled("A", "Go");
        let l = locator();
        assert_eq!(l.locate(&dom, &target), l.locate(&dom, &target));
    }

    #[test]
    fn test_exit_region() {
        let mut dom = Dom::new();
        let root = dom.root();
        dom.append(root, ElementBuilder::new("button").text("Onwards"));
        let target = TargetDescriptor::exit("Onwards");
        assert_eq!(locator().locate(&dom, &target), None);

        dom.append(
            root,
            ElementBuilder::new("div")
                .class("buttons--storylet-exit-options")
                .child(ElementBuilder::new("button").id("exit").text("Onwards")),
        );
        let found = locator().locate(&dom, &target).unwrap();
        assert_eq!(Some(found.node), dom.find_by_id("exit"));
    }
}
