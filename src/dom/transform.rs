//! Structural edits: stripping and relocating selected subtrees

use crate::dom::document::Document;
use crate::dom::xpath::{Hit, XPath};
use crate::error::{RelayError, Result};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// Where a moved node lands relative to its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Position {
    /// Right before the destination, under the destination's parent.
    InsideUp,
    /// Right after the destination, under the destination's parent.
    #[default]
    InsideDown,
    /// Right before the destination's parent, under the grandparent.
    OutsideUp,
    /// Right after the destination's parent, under the grandparent.
    OutsideDown,
}

impl Position {
    fn is_outside(self) -> bool {
        matches!(self, Position::OutsideUp | Position::OutsideDown)
    }

    fn is_before(self) -> bool {
        matches!(self, Position::InsideUp | Position::OutsideUp)
    }
}

impl FromStr for Position {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "inside-up" => Ok(Position::InsideUp),
            "inside-down" => Ok(Position::InsideDown),
            "outside-up" => Ok(Position::OutsideUp),
            "outside-down" => Ok(Position::OutsideDown),
            _ => Err(RelayError::ConfigError(format!(
                "unknown move position `{s}` (expected inside-up, inside-down, outside-up or outside-down)"
            ))),
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Position::InsideUp => "inside-up",
            Position::InsideDown => "inside-down",
            Position::OutsideUp => "outside-up",
            Position::OutsideDown => "outside-down",
        })
    }
}

/// Relocate the first `source` hit next to the first `destination` hit.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveRule {
    pub source: XPath,
    pub destination: XPath,
    pub position: Position,
}

/// Remove every node selected by each selector, in order.
///
/// Each selector sees the tree as left by the previous ones. Attribute hits
/// remove the attribute from its element. Returns the number of removals.
pub fn strip(doc: &mut Document, selectors: &[XPath]) -> usize {
    let mut removed = 0;

    for selector in selectors {
        let hits = selector.select(doc);
        if hits.is_empty() {
            debug!("Strip selector `{}` matched nothing", selector);
            continue;
        }

        // Back to front, so attribute indices on the same element stay valid.
        for hit in hits.into_iter().rev() {
            match hit {
                Hit::Node(node) if node == doc.root() => continue,
                Hit::Node(node) => doc.detach(node),
                Hit::Attribute(owner, index) => {
                    if !doc.remove_attribute(owner, index) {
                        continue;
                    }
                }
            }
            removed += 1;
        }
    }

    removed
}

/// Apply move rules in order. Returns the number of rules that moved a node.
pub fn relocate(doc: &mut Document, rules: &[MoveRule]) -> usize {
    rules.iter().filter(|rule| apply_move(doc, rule)).count()
}

fn apply_move(doc: &mut Document, rule: &MoveRule) -> bool {
    let Some(source) = rule.source.select_first(doc) else {
        debug!("Move source `{}` matched nothing", rule.source);
        return false;
    };
    let Some(destination) = rule.destination.select_first(doc) else {
        debug!("Move destination `{}` matched nothing", rule.destination);
        return false;
    };

    let Hit::Node(source) = source else {
        warn!("Move source `{}` selected an attribute; skipping", rule.source);
        return false;
    };
    // An attribute destination stands for its element.
    let destination = destination.node();

    let anchor = if rule.position.is_outside() {
        match doc.parent(destination) {
            Some(parent) => parent,
            None => {
                debug!("Move destination `{}` has no parent", rule.destination);
                return false;
            }
        }
    } else {
        destination
    };

    let moved = if rule.position.is_before() {
        doc.insert_before(anchor, source)
    } else {
        doc.insert_after(anchor, source)
    };

    if !moved {
        warn!(
            "Cannot move `{}` {} `{}`: the target is the node itself, inside it, or has no parent",
            rule.source, rule.position, rule.destination
        );
    }
    moved
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xpath(s: &str) -> XPath {
        XPath::compile(s).unwrap()
    }

    fn rule(source: &str, destination: &str, position: Position) -> MoveRule {
        MoveRule {
            source: xpath(source),
            destination: xpath(destination),
            position,
        }
    }

    fn body(doc: &Document) -> String {
        let html = doc.serialize();
        let start = html.find("<body>").unwrap() + "<body>".len();
        let end = html.find("</body>").unwrap();
        html[start..end].to_string()
    }

    const LAYOUT: &str = "<html><head></head><body><main><section><h1>Title</h1><p>Text</p></section></main><nav><a href=\"/\">Home</a><a href=\"/about\">About</a></nav></body></html>";

    #[test]
    fn strip_removes_every_script() {
        let mut doc = Document::parse_str(
            "<html><head><script>a()</script></head><body><script src=\"x.js\"></script><p>keep</p><script>b()</script></body></html>",
        );
        let removed = strip(&mut doc, &[xpath("//script")]);
        assert_eq!(removed, 3);
        let html = doc.serialize();
        assert!(!html.contains("<script"));
        assert!(html.contains("<p>keep</p>"));
    }

    #[test]
    fn strip_is_idempotent() {
        let mut doc = Document::parse_str(LAYOUT);
        let rules = [xpath("//nav"), xpath("//p")];
        strip(&mut doc, &rules);
        let once = doc.serialize();
        assert_eq!(strip(&mut doc, &rules), 0);
        assert_eq!(doc.serialize(), once);
    }

    #[test]
    fn later_strip_rules_see_earlier_removals() {
        let mut doc = Document::parse_str(LAYOUT);
        let removed = strip(&mut doc, &[xpath("//section"), xpath("//h1")]);
        assert_eq!(removed, 1);
        assert_eq!(body(&doc), "<main></main><nav><a href=\"/\">Home</a><a href=\"/about\">About</a></nav>");
    }

    #[test]
    fn strip_removes_selected_attributes() {
        let mut doc = Document::parse_str(LAYOUT);
        strip(&mut doc, &[xpath("//a/@href")]);
        assert!(body(&doc).ends_with("<nav><a>Home</a><a>About</a></nav>"));
    }

    #[test]
    fn inside_up_places_source_before_destination() {
        let mut doc = Document::parse_str(LAYOUT);
        assert_eq!(relocate(&mut doc, &[rule("//nav", "//p", Position::InsideUp)]), 1);
        assert_eq!(
            body(&doc),
            "<main><section><h1>Title</h1><nav><a href=\"/\">Home</a><a href=\"/about\">About</a></nav><p>Text</p></section></main>"
        );
    }

    #[test]
    fn inside_down_places_source_after_destination() {
        let mut doc = Document::parse_str(LAYOUT);
        relocate(&mut doc, &[rule("//nav", "//h1", Position::InsideDown)]);
        assert_eq!(
            body(&doc),
            "<main><section><h1>Title</h1><nav><a href=\"/\">Home</a><a href=\"/about\">About</a></nav><p>Text</p></section></main>"
        );
    }

    #[test]
    fn outside_up_places_source_before_destination_parent() {
        let mut doc = Document::parse_str(LAYOUT);
        relocate(&mut doc, &[rule("//nav", "//h1", Position::OutsideUp)]);
        assert_eq!(
            body(&doc),
            "<main><nav><a href=\"/\">Home</a><a href=\"/about\">About</a></nav><section><h1>Title</h1><p>Text</p></section></main>"
        );
    }

    #[test]
    fn outside_down_places_nav_after_destination_parent() {
        let mut doc = Document::parse_str(LAYOUT);
        relocate(&mut doc, &[rule("//nav", "//main/section/h1", Position::OutsideDown)]);
        assert_eq!(
            body(&doc),
            "<main><section><h1>Title</h1><p>Text</p></section><nav><a href=\"/\">Home</a><a href=\"/about\">About</a></nav></main>"
        );
    }

    #[test]
    fn moved_subtree_is_preserved() {
        let mut doc = Document::parse_str(LAYOUT);
        let nav = xpath("//nav").select_first(&doc).unwrap().node();
        let before: Vec<_> = doc.descendants(nav).collect();

        relocate(&mut doc, &[rule("//nav", "//h1", Position::InsideUp)]);

        assert_eq!(doc.descendants(nav).collect::<Vec<_>>(), before);
        assert!(doc.is_attached(nav));
    }

    #[test]
    fn missing_source_or_destination_skips_the_rule() {
        let mut doc = Document::parse_str(LAYOUT);
        let original = doc.serialize();
        let rules = [
            rule("//aside", "//h1", Position::InsideUp),
            rule("//nav", "//footer", Position::InsideUp),
        ];
        assert_eq!(relocate(&mut doc, &rules), 0);
        assert_eq!(doc.serialize(), original);
    }

    #[test]
    fn refuses_to_move_a_node_into_itself() {
        let mut doc = Document::parse_str(LAYOUT);
        let original = doc.serialize();
        assert_eq!(relocate(&mut doc, &[rule("//main", "//h1", Position::InsideDown)]), 0);
        assert_eq!(relocate(&mut doc, &[rule("//section", "//h1", Position::OutsideUp)]), 0);
        assert_eq!(doc.serialize(), original);
    }

    #[test]
    fn later_rules_see_earlier_moves() {
        let mut doc = Document::parse_str(LAYOUT);
        let rules = [
            rule("//nav", "//h1", Position::InsideUp),
            rule("//p", "//nav", Position::InsideUp),
        ];
        assert_eq!(relocate(&mut doc, &rules), 2);
        assert_eq!(
            body(&doc),
            "<main><section><p>Text</p><nav><a href=\"/\">Home</a><a href=\"/about\">About</a></nav><h1>Title</h1></section></main>"
        );
    }

    #[test]
    fn positions_parse_from_config_strings() {
        assert_eq!("outside-down".parse::<Position>().unwrap(), Position::OutsideDown);
        assert_eq!("Inside_Up".parse::<Position>().unwrap(), Position::InsideUp);
        assert!("sideways".parse::<Position>().is_err());
        assert_eq!(Position::OutsideUp.to_string(), "outside-up");
    }
}
