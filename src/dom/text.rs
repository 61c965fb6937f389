//! Visible-text normalization
//!
//! In-browser translators inject their own markup next to the game's text and
//! separate it with a double non-breaking space. Labels also carry trailing
//! stock counters such as `(3)` that say nothing about identity. Everything
//! that compares labels goes through here.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{Dom, NodeId, Selector};

/// Separator translators put between original and translated text
const TRANSLATION_SEPARATOR: &str = "\u{a0}\u{a0}";

static TRAILING_COUNTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\(\d+\)$").expect("counter pattern is valid"));

/// Cut translator output, collapse whitespace and trim
pub fn normalize(raw: &str) -> String {
    let original = raw
        .find(TRANSLATION_SEPARATOR)
        .map_or(raw, |cut| &raw[..cut]);
    original.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize and drop a trailing `(N)` counter
pub fn normalize_label(raw: &str) -> String {
    let text = normalize(raw);
    TRAILING_COUNTER.replace(&text, "").trim().to_string()
}

/// Whether two labels name the same control
pub fn labels_match(a: &str, b: &str) -> bool {
    normalize_label(a) == normalize_label(b)
}

/// Text of `node` with translation overlays removed, normalized
pub fn visible_text(dom: &Dom, node: NodeId, overlays: &Selector) -> String {
    let mut raw = String::new();
    dom.collect_text(node, &mut |n| overlays.matches(dom, n), &mut raw);
    normalize(&raw)
}

/// The label a player would read on a control
///
/// Prefers the first `span` that is not an icon or buttonlet, since the game
/// wraps the real caption in one and puts badges beside it.
pub fn control_label(dom: &Dom, control: NodeId, overlays: &Selector) -> String {
    let caption = dom
        .descendants(control)
        .filter(|&n| {
            dom.element(n).is_some_and(|el| {
                let class = el.attr("class").unwrap_or_default();
                el.tag == "span" && !class.contains("buttonlet") && !class.contains("fa-")
            })
        })
        .filter(|&n| !overlays.matches(dom, n))
        .map(|n| visible_text(dom, n, overlays))
        .find(|text| !text.is_empty());

    let text = match caption {
        Some(text) => text,
        None => {
            let own = visible_text(dom, control, overlays);
            if own.is_empty() {
                dom.element(control)
                    .and_then(|el| el.attr("value"))
                    .map(normalize)
                    .unwrap_or_default()
            } else {
                own
            }
        }
    };

    normalize_label(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::ElementBuilder;

    fn overlays() -> Selector {
        Selector::parse(
            "font.immersive-translate-target-wrapper, .immersive-translate-target-wrapper, font.notranslate",
        )
        .unwrap()
    }

    #[test]
    fn test_normalize_whitespace_and_separator() {
        assert_eq!(normalize("  Go   to\n market "), "Go to market");
        assert_eq!(normalize("Onwards\u{a0}\u{a0}继续"), "Onwards");
    }

    #[test]
    fn test_trailing_counter() {
        assert_eq!(normalize_label("Sell Rostygold (3)"), "Sell Rostygold");
        assert_eq!(normalize_label("Chapter (II)"), "Chapter (II)");
        assert!(labels_match("Go (12)", " Go"));
    }

    #[test]
    fn test_overlay_is_stripped() {
        let mut dom = Dom::new();
        let root = dom.root();
        let button = dom.append(
            root,
            ElementBuilder::new("button")
                .text("Onwards")
                .child(
                    ElementBuilder::new("font")
                        .class("immersive-translate-target-wrapper")
                        .text("继续"),
                ),
        );
        assert_eq!(control_label(&dom, button, &overlays()), "Onwards");
    }

    #[test]
    fn test_span_caption_preferred() {
        let mut dom = Dom::new();
        let root = dom.root();
        let button = dom.append(
            root,
            ElementBuilder::new("button")
                .child(ElementBuilder::new("span").class("fa-solid fa-lock"))
                .child(ElementBuilder::new("span").class("buttonlet").text("?"))
                .child(ElementBuilder::new("span").text("Go (2)")),
        );
        assert_eq!(control_label(&dom, button, &overlays()), "Go");
    }

    #[test]
    fn test_input_value_fallback() {
        let mut dom = Dom::new();
        let root = dom.root();
        let input = dom.append(
            root,
            ElementBuilder::new("input")
                .attr("type", "submit")
                .attr("value", "Continue"),
        );
        assert_eq!(control_label(&dom, input, &overlays()), "Continue");
    }
}
