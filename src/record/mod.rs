//! Action recorder
//!
//! Turns the operator's clicks into [`ActionRecord`]s that sequence mode can
//! replay. Each click is described by the strongest identifier available at
//! the time, since ids and class names in the game's markup change between
//! releases while branch ids and block titles do not.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;

use crate::automation::ActionRecord;
use crate::config::settings::LocatorProfile;
use crate::dom::text::{control_label, visible_text};
use crate::dom::{Dom, NodeId, Selector};
use crate::locate::{title_hint, StableKey, TargetDescriptor};
use crate::locate::target::BRANCH_ID_ATTRIBUTE;

/// Length of the markup snippet kept with each record
pub const DEBUG_HTML_LEN: usize = 250;
/// How far up from a control to look for a titled block
const TITLE_SEARCH_DEPTH: usize = 5;

/// Classes that describe UI state rather than identity
const STATE_CLASSES: [&str; 4] = ["selected", "active", "highlight", "js-tt"];
const TRANSLATOR_PREFIX: &str = "immersive-translate";

static BRANCH_CONTAINER: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[data-branch-id]").expect("built-in selector is valid"));
static BUTTON_ROW: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(".buttons--storylet-exit-options, .storylet__buttons")
        .expect("built-in selector is valid")
});

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("No actions recorded")]
    Empty,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Collects clicked controls while recording
pub struct Recorder {
    profile: LocatorProfile,
    recording: bool,
    records: Vec<ActionRecord>,
}

impl Recorder {
    pub fn new(profile: LocatorProfile) -> Self {
        Self {
            profile,
            recording: false,
            records: Vec::new(),
        }
    }

    /// Begin a fresh recording, discarding the previous one
    pub fn start(&mut self) {
        if self.recording {
            return;
        }
        self.recording = true;
        self.records.clear();
        log::info!("Recording started");
    }

    /// Stop recording and return the number of captured actions
    pub fn stop(&mut self) -> usize {
        if self.recording {
            self.recording = false;
            log::info!("Recording stopped: {} action(s)", self.records.len());
        }
        self.records.len()
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn records(&self) -> &[ActionRecord] {
        &self.records
    }

    /// Record a click on `clicked` (or on whatever control contains it)
    pub fn capture(&mut self, dom: &Dom, clicked: NodeId) -> Option<ActionRecord> {
        if !self.recording {
            return None;
        }
        let Some(record) = self.describe(dom, clicked) else {
            log::info!("Could not identify the clicked control");
            return None;
        };
        log::info!("Recorded {}", record.target);
        self.records.push(record.clone());
        Some(record)
    }

    /// Describe the control containing `clicked`
    pub fn describe(&self, dom: &Dom, clicked: NodeId) -> Option<ActionRecord> {
        let control = dom.closest(clicked, &self.profile.controls)?;
        let label = control_label(dom, control, &self.profile.overlays);
        if label.is_empty() {
            return None;
        }

        let target = self
            .branch_target(dom, control, &label)
            .or_else(|| {
                self.block_title(dom, control)
                    .map(|title| TargetDescriptor::titled(title, label.clone()))
            })
            .or_else(|| {
                dom.element(control)?
                    .id()
                    .map(|id| TargetDescriptor::ByStableId {
                        key: StableKey::ElementId(id.to_string()),
                        label: label.clone(),
                    })
            })
            .or_else(|| structural_target(dom, control, &label))?;

        let mut record = ActionRecord::click(target);
        record.debug_html = Some(self.debug_html(dom, control));
        Some(record)
    }

    fn branch_target(&self, dom: &Dom, control: NodeId, label: &str) -> Option<TargetDescriptor> {
        let branch = dom.closest(control, &BRANCH_CONTAINER)?;
        let id = dom.element(branch)?.attr(BRANCH_ID_ATTRIBUTE)?;
        if id.is_empty() {
            return None;
        }
        Some(TargetDescriptor::ByStableId {
            key: StableKey::Attribute {
                name: BRANCH_ID_ATTRIBUTE.to_string(),
                value: id.to_string(),
            },
            label: label.to_string(),
        })
    }

    /// Heading text of the block the control belongs to
    fn block_title(&self, dom: &Dom, control: NodeId) -> Option<String> {
        // A button row's parent is the block itself
        let from_row = dom
            .closest(control, &BUTTON_ROW)
            .and_then(|row| dom.parent(row))
            .and_then(|block| self.heading_in(dom, block));

        from_row.or_else(|| {
            dom.ancestors(control)
                .take(TITLE_SEARCH_DEPTH)
                .find_map(|block| self.heading_in(dom, block))
        })
    }

    fn heading_in(&self, dom: &Dom, block: NodeId) -> Option<String> {
        let heading = dom.select_within(block, &self.profile.headings).into_iter().next()?;
        let title = title_hint(&visible_text(dom, heading, &self.profile.overlays));
        (!title.is_empty()).then_some(title)
    }

    /// Control markup without translator residue, truncated
    fn debug_html(&self, dom: &Dom, control: NodeId) -> String {
        let mut scratch = dom.clone();
        for overlay in scratch.select_within(control, &self.profile.overlays) {
            scratch.detach(overlay);
        }
        let mut nodes: Vec<NodeId> = scratch.descendants(control).collect();
        nodes.push(control);
        for node in nodes {
            if let Some(el) = scratch.element_mut(node) {
                el.attrs
                    .retain(|name, _| !name.starts_with("data-immersive-translate"));
            }
        }
        scratch
            .outer_html(control)
            .chars()
            .take(DEBUG_HTML_LEN)
            .collect()
    }
}

/// `tag.class.class` selector for a control with nothing better to go on
fn structural_target(dom: &Dom, control: NodeId, label: &str) -> Option<TargetDescriptor> {
    let el = dom.element(control)?;
    let mut css = el.tag.clone();
    for class in el.classes().filter(|c| {
        !STATE_CLASSES.contains(c) && !c.starts_with(TRANSLATOR_PREFIX)
    }) {
        css.push('.');
        css.push_str(class);
    }

    let selector = match Selector::parse(&css) {
        Ok(selector) => selector,
        Err(e) => {
            log::debug!("Falling back to the bare tag for {}: {}", css, e);
            Selector::parse(&el.tag).ok()?
        }
    };
    Some(TargetDescriptor::BySelectorFallback {
        selector,
        label: label.to_string(),
    })
}

/// Write `records` to a timestamped JSON file in `dir`
pub fn save_recording(dir: &Path, records: &[ActionRecord]) -> Result<PathBuf, RecordError> {
    if records.is_empty() {
        return Err(RecordError::Empty);
    }
    let stamp = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S");
    let path = dir.join(format!("actions_{stamp}.json"));

    std::fs::create_dir_all(dir)?;
    let json = serde_json::to_string_pretty(records)?;
    std::fs::write(&path, json)?;

    log::info!("Saved {} action(s) to {}", records.len(), path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::rules::{load_config_file, LoadedConfig};
    use crate::dom::ElementBuilder;
    use tempfile::TempDir;

    fn recording() -> Recorder {
        let mut recorder = Recorder::new(LocatorProfile::default());
        recorder.start();
        recorder
    }

    #[test]
    fn test_branch_id_wins() {
        let mut dom = Dom::new();
        let root = dom.root();
        let branch = dom.append(
            root,
            ElementBuilder::new("div")
                .class("branch")
                .attr("data-branch-id", "204")
                .child(ElementBuilder::new("h2").text("Go to market"))
                .child(ElementBuilder::new("button").child(ElementBuilder::new("span").text("Go"))),
        );
        let span = dom.descendants(branch).find(|&n| {
            dom.element(n).is_some_and(|el| el.tag == "span")
        }).unwrap();

        let mut recorder = recording();
        let record = recorder.capture(&dom, span).unwrap();
        assert_eq!(
            record.target,
            TargetDescriptor::ByStableId {
                key: StableKey::Attribute {
                    name: BRANCH_ID_ATTRIBUTE.to_string(),
                    value: "204".to_string(),
                },
                label: "Go".to_string(),
            }
        );
        assert_eq!(recorder.records().len(), 1);
    }

    #[test]
    fn test_titled_block_from_button_row() {
        let mut dom = Dom::new();
        let root = dom.root();
        let block = dom.append(
            root,
            ElementBuilder::new("div")
                .class("storylet")
                .child(ElementBuilder::new("h1").text("A Dark Alley"))
                .child(
                    ElementBuilder::new("div")
                        .class("buttons--storylet-exit-options")
                        .child(ElementBuilder::new("button").text("Onwards")),
                ),
        );
        let button = dom
            .descendants(block)
            .find(|&n| dom.element(n).is_some_and(|el| el.tag == "button"))
            .unwrap();

        let record = recording().capture(&dom, button).unwrap();
        assert_eq!(record.target, TargetDescriptor::titled("A Dark Alley", "Onwards"));
    }

    #[test]
    fn test_id_then_selector_fallback() {
        let mut dom = Dom::new();
        let root = dom.root();
        let with_id = dom.append(root, ElementBuilder::new("button").id("draw").text("Draw"));
        let bare = dom.append(
            root,
            ElementBuilder::new("button")
                .class("deck-button")
                .class("active")
                .class("immersive-translate-walked")
                .text("Shuffle (2)"),
        );

        let mut recorder = recording();
        let first = recorder.capture(&dom, with_id).unwrap();
        assert_eq!(
            first.target,
            TargetDescriptor::ByStableId {
                key: StableKey::ElementId("draw".to_string()),
                label: "Draw".to_string(),
            }
        );

        let second = recorder.capture(&dom, bare).unwrap();
        match second.target {
            TargetDescriptor::BySelectorFallback { selector, label } => {
                assert_eq!(selector.as_str(), "button.deck-button");
                assert_eq!(label, "Shuffle");
            }
            other => panic!("unexpected target {other:?}"),
        }
    }

    #[test]
    fn test_ignores_clicks_when_idle_or_off_control() {
        let mut dom = Dom::new();
        let root = dom.root();
        let text = dom.append(root, ElementBuilder::new("p").text("flavour"));
        let button = dom.append(root, ElementBuilder::new("button").text("Go"));

        let mut recorder = Recorder::new(LocatorProfile::default());
        assert!(recorder.capture(&dom, button).is_none());

        recorder.start();
        assert!(recorder.capture(&dom, text).is_none());
        assert!(recorder.capture(&dom, button).is_some());
        assert_eq!(recorder.stop(), 1);
        assert!(!recorder.is_recording());
    }

    #[test]
    fn test_debug_html_is_cleaned_and_truncated() {
        let mut dom = Dom::new();
        let root = dom.root();
        let button = dom.append(
            root,
            ElementBuilder::new("button")
                .id("long")
                .attr("data-immersive-translate-walked", "x")
                .text(&"Onwards ".repeat(60))
                .child(
                    ElementBuilder::new("font")
                        .class("immersive-translate-target-wrapper")
                        .text("translated"),
                ),
        );

        let record = recording().capture(&dom, button).unwrap();
        let html = record.debug_html.unwrap();
        assert!(html.starts_with("<button id=\"long\">"));
        assert!(!html.contains("translated"));
        assert_eq!(html.chars().count(), DEBUG_HTML_LEN);
    }

    #[test]
    fn test_save_recording_loads_back() {
        let dir = TempDir::new().unwrap();
        let records = vec![
            ActionRecord::click(TargetDescriptor::titled("Go to market", "Go")).with_exit("Onwards"),
        ];

        let path = save_recording(dir.path(), &records).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("actions_") && name.ends_with(".json"));
        assert_eq!(
            load_config_file(&path).unwrap(),
            LoadedConfig::Recording(records)
        );

        assert!(matches!(
            save_recording(dir.path(), &[]),
            Err(RecordError::Empty)
        ));
    }
}
