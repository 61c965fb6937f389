//! CSS selectors over the arena tree
//!
//! Parsing and matching use the `selectors` engine with `scraper`'s plain
//! selector implementation, so settings files accept ordinary CSS: type,
//! `#id`, `.class`, attribute tests, combinators, `:not(..)` and lists.
//! A `(&Dom, NodeId)` pair is adapted to the engine's element trait.

use std::fmt;
use std::str::FromStr;

use cssparser::{ParseErrorKind, ParserInput, ToCss};
use scraper::selector::{CssLocalName, CssString, NonTSPseudoClass, PseudoElement, Simple};
use selectors::attr::{AttrSelectorOperation, CaseSensitivity, NamespaceConstraint};
use selectors::matching::{
    self, ElementSelectorFlags, IgnoreNthChildForInvalidation, MatchingContext, MatchingMode,
    NeedsSelectorFlags, QuirksMode,
};
use selectors::parser::{ParseRelative, SelectorImpl, SelectorParseErrorKind};
use selectors::{NthIndexCache, OpaqueElement, SelectorList};
use serde::{Deserialize, Serialize};

use super::{Dom, Element, NodeId, NodeKind};

const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

type Namespace = <Simple as SelectorImpl>::NamespaceUrl;

/// A parsed selector list that keeps its source text
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Selector {
    source: String,
    list: SelectorList<Simple>,
}

/// Selector parse failures
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SelectorError {
    #[error("empty selector")]
    Empty,
    #[error("invalid selector {selector:?}: {reason} (column {column})")]
    Invalid {
        selector: String,
        reason: String,
        column: u32,
    },
}

impl Selector {
    /// Parse a selector list
    pub fn parse(source: &str) -> Result<Self, SelectorError> {
        let source = source.trim();
        if source.is_empty() {
            return Err(SelectorError::Empty);
        }

        let mut input = ParserInput::new(source);
        let mut parser = cssparser::Parser::new(&mut input);
        let list = SelectorList::parse(&scraper::selector::Parser, &mut parser, ParseRelative::No)
            .map_err(|err| SelectorError::Invalid {
                selector: source.to_string(),
                reason: match err.kind {
                    ParseErrorKind::Basic(kind) => kind.to_string(),
                    ParseErrorKind::Custom(kind) => describe(&kind),
                },
                column: err.location.column,
            })?;

        Ok(Self {
            source: source.to_string(),
            list,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the element `node` matches any selector of the list
    pub fn matches(&self, dom: &Dom, node: NodeId) -> bool {
        let Some(element) = DomElement::new(dom, node) else {
            return false;
        };

        let mut nth_index_cache = NthIndexCache::default();
        let mut context = MatchingContext::new(
            MatchingMode::Normal,
            None,
            &mut nth_index_cache,
            QuirksMode::NoQuirks,
            NeedsSelectorFlags::No,
            IgnoreNthChildForInvalidation::No,
        );
        matching::matches_selector_list(&self.list, &element, &mut context)
    }

    /// Every selector of this list, restricted to descendants of `ancestor`
    pub fn scoped_to(&self, ancestor: &str) -> Result<Self, SelectorError> {
        let ancestor = Self::parse(ancestor)?;
        let scoped = ancestor
            .list
            .0
            .iter()
            .flat_map(|outer| {
                self.list
                    .0
                    .iter()
                    .map(move |inner| format!("{} {}", outer.to_css_string(), inner.to_css_string()))
            })
            .collect::<Vec<_>>()
            .join(", ");
        Self::parse(&scoped)
    }
}

fn describe(kind: &SelectorParseErrorKind<'_>) -> String {
    match kind {
        SelectorParseErrorKind::EmptySelector => "empty selector in list".to_string(),
        SelectorParseErrorKind::DanglingCombinator => "combinator without a selector".to_string(),
        other => format!("{:?}", other),
    }
}

impl PartialEq for Selector {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Selector {
    type Error = SelectorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Selector> for String {
    fn from(selector: Selector) -> Self {
        selector.source
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// An element of a [`Dom`] as seen by the selector engine
///
/// Every element is treated as HTML; there are no pseudo-classes beyond
/// the tree-structural ones.
#[derive(Clone, Copy)]
struct DomElement<'a> {
    dom: &'a Dom,
    id: NodeId,
    element: &'a Element,
}

impl<'a> DomElement<'a> {
    /// Wrap `id` if it is an element node
    fn new(dom: &'a Dom, id: NodeId) -> Option<Self> {
        dom.element(id).map(|element| Self { dom, id, element })
    }

    fn sibling_element(&self, step: impl Fn(usize) -> Option<usize>) -> Option<Self> {
        let siblings = self.dom.children(self.dom.parent(self.id)?);
        let mut index = siblings.iter().position(|&n| n == self.id)?;
        loop {
            index = step(index)?;
            if let Some(sibling) = DomElement::new(self.dom, *siblings.get(index)?) {
                return Some(sibling);
            }
        }
    }
}

impl fmt::Debug for DomElement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomElement")
            .field("id", &self.id)
            .field("tag", &self.element.tag)
            .finish()
    }
}

impl selectors::Element for DomElement<'_> {
    type Impl = Simple;

    fn opaque(&self) -> OpaqueElement {
        OpaqueElement::new(self.element)
    }

    fn parent_element(&self) -> Option<Self> {
        DomElement::new(self.dom, self.dom.parent(self.id)?)
    }

    fn parent_node_is_shadow_root(&self) -> bool {
        false
    }

    fn containing_shadow_host(&self) -> Option<Self> {
        None
    }

    fn is_pseudo_element(&self) -> bool {
        false
    }

    fn prev_sibling_element(&self) -> Option<Self> {
        self.sibling_element(|i| i.checked_sub(1))
    }

    fn next_sibling_element(&self) -> Option<Self> {
        self.sibling_element(|i| Some(i + 1))
    }

    fn first_element_child(&self) -> Option<Self> {
        self.dom
            .children(self.id)
            .iter()
            .find_map(|&child| DomElement::new(self.dom, child))
    }

    fn is_html_element_in_html_document(&self) -> bool {
        true
    }

    fn has_local_name(&self, name: &CssLocalName) -> bool {
        *self.element.tag == *name.0
    }

    fn has_namespace(&self, namespace: &Namespace) -> bool {
        **namespace == *HTML_NAMESPACE
    }

    fn is_same_type(&self, other: &Self) -> bool {
        self.element.tag == other.element.tag
    }

    fn attr_matches(
        &self,
        ns: &NamespaceConstraint<&Namespace>,
        local_name: &CssLocalName,
        operation: &AttrSelectorOperation<&CssString>,
    ) -> bool {
        if let NamespaceConstraint::Specific(url) = ns {
            if !url.is_empty() {
                return false;
            }
        }
        self.element
            .attr(&local_name.0)
            .is_some_and(|value| operation.eval_str(value))
    }

    fn match_non_ts_pseudo_class(
        &self,
        _pc: &NonTSPseudoClass,
        _context: &mut MatchingContext<'_, Simple>,
    ) -> bool {
        false
    }

    fn match_pseudo_element(
        &self,
        _pe: &PseudoElement,
        _context: &mut MatchingContext<'_, Simple>,
    ) -> bool {
        false
    }

    fn apply_selector_flags(&self, _flags: ElementSelectorFlags) {}

    fn is_link(&self) -> bool {
        self.element.tag == "a" && self.element.attr("href").is_some()
    }

    fn is_html_slot_element(&self) -> bool {
        false
    }

    fn has_id(&self, id: &CssLocalName, case_sensitivity: CaseSensitivity) -> bool {
        self.element
            .id()
            .is_some_and(|own| case_sensitivity.eq(own.as_bytes(), id.0.as_bytes()))
    }

    fn has_class(&self, name: &CssLocalName, case_sensitivity: CaseSensitivity) -> bool {
        self.element
            .classes()
            .any(|class| case_sensitivity.eq(class.as_bytes(), name.0.as_bytes()))
    }

    fn imported_part(&self, _name: &CssLocalName) -> Option<CssLocalName> {
        None
    }

    fn is_part(&self, _name: &CssLocalName) -> bool {
        false
    }

    fn is_empty(&self) -> bool {
        self.dom.children(self.id).iter().all(|&child| {
            match self.dom.node(child).map(|n| &n.kind) {
                Some(NodeKind::Element(_)) => false,
                Some(NodeKind::Text(text)) => text.is_empty(),
                None => true,
            }
        })
    }

    fn is_root(&self) -> bool {
        self.id == self.dom.root()
    }
}
