//! Visibility oracle
//!
//! Decides whether a resolved element can actually be clicked. Some
//! front-end frameworks leave zero-size ghost nodes in the tree, so a box
//! check is required on top of the style checks.

use crate::dom::{Display, Dom, NodeId, Visibility};

/// Opacity below which an element counts as invisible
pub const MIN_OPACITY: f32 = 0.1;

/// Box edges must exceed this many pixels
pub const MIN_EXTENT_PX: f32 = 1.0;

/// Whether `node` is attached, rendered and large enough to click
pub fn is_interactable(dom: &Dom, node: NodeId) -> bool {
    if !dom.is_attached(node) {
        return false;
    }
    let Some(el) = dom.element(node) else {
        return false;
    };

    // A `display: none` ancestor removes the whole subtree from layout
    let rendered = std::iter::once(node)
        .chain(dom.ancestors(node))
        .filter_map(|n| dom.element(n))
        .all(|e| e.style.display != Display::None);

    rendered
        && el.style.visibility != Visibility::Hidden
        && el.style.opacity >= MIN_OPACITY
        && el.rect.width > MIN_EXTENT_PX
        && el.rect.height > MIN_EXTENT_PX
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{ElementBuilder, Style};

    fn single(builder: ElementBuilder) -> (Dom, NodeId) {
        let mut dom = Dom::new();
        let root = dom.root();
        let id = dom.append(root, builder);
        (dom, id)
    }

    #[test]
    fn test_plain_button_is_interactable() {
        let (dom, id) = single(ElementBuilder::new("button").text("Go"));
        assert!(is_interactable(&dom, id));
    }

    #[test]
    fn test_style_rules() {
        let hidden = Style {
            visibility: Visibility::Hidden,
            ..Style::default()
        };
        let faint = Style {
            opacity: 0.05,
            ..Style::default()
        };

        assert!(!is_interactable(&single(ElementBuilder::new("button").hidden()).0, NodeId(1)));
        assert!(!is_interactable(&single(ElementBuilder::new("button").style(hidden)).0, NodeId(1)));
        assert!(!is_interactable(&single(ElementBuilder::new("button").style(faint)).0, NodeId(1)));
    }

    #[test]
    fn test_ghost_box_rejected() {
        let (dom, id) = single(ElementBuilder::new("button").rect(1.0, 30.0));
        assert!(!is_interactable(&dom, id));
    }

    #[test]
    fn test_hidden_ancestor_and_detached() {
        let (mut dom, wrapper) = single(
            ElementBuilder::new("div")
                .hidden()
                .child(ElementBuilder::new("button").text("Go")),
        );
        let button = dom.descendants(wrapper).next().unwrap();
        assert!(!is_interactable(&dom, button));

        let root = dom.root();
        let visible = dom.append(root, ElementBuilder::new("button").text("Go"));
        assert!(is_interactable(&dom, visible));
        dom.detach(visible);
        assert!(!is_interactable(&dom, visible));
    }
}
