//! Content canonicalization.
//!
//! Panel content reaches the sync engine either as rich-text markup (what the
//! edit surface emits) or as a structured node tree (what the version store
//! holds). Everything that compares content goes through [`canonicalize`] so
//! that two documents are equal iff their canonical serializations are
//! byte-identical, regardless of where they came from.
//!
//! The tree uses the edit surface's schema:
//! - blocks: `doc`, `paragraph`, `heading`, `blockquote`, `bulletList`,
//!   `orderedList`, `listItem`, `codeBlock`, `horizontalRule`
//! - inline: `text`, `hardBreak`
//! - marks: `bold`, `italic`, `underline`, `strike`, `code`, `link`

mod parse;
mod render;
mod schema;

pub use render::render_markup;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentError {
    #[error("unterminated tag at byte {0}")]
    UnterminatedTag(usize),

    #[error("malformed tag at byte {0}")]
    MalformedTag(usize),

    #[error("unexpected closing tag </{found}> at byte {offset}")]
    UnexpectedClose { found: String, offset: usize },

    #[error("element <{0}> is never closed")]
    Unclosed(String),

    #[error("unsupported element <{0}>")]
    UnsupportedElement(String),

    #[error("element <{child}> is not allowed inside <{parent}>")]
    Misplaced { child: String, parent: String },

    #[error("malformed entity at byte {0}")]
    MalformedEntity(usize),

    #[error("invalid {node} node: {reason}")]
    InvalidNode { node: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ContentError>;

/// A formatting mark on a text node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mark {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, Value>,
}

impl Mark {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn link(href: &str) -> Self {
        let mut mark = Self::new("link");
        mark.attrs.insert("href".into(), Value::String(href.to_string()));
        mark
    }

    fn sort_key(&self) -> (String, String) {
        let attrs = serde_json::to_string(&self.attrs).unwrap_or_default();
        (self.kind.clone(), attrs)
    }
}

/// Sort marks into canonical order and drop duplicates.
pub(crate) fn normalize_marks(marks: &mut Vec<Mark>) {
    marks.sort_by_key(Mark::sort_key);
    marks.dedup();
}

/// One node of a content tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub marks: Vec<Mark>,
}

impl Node {
    pub fn element(kind: &str, content: Vec<Node>) -> Self {
        Self {
            kind: kind.to_string(),
            attrs: BTreeMap::new(),
            content,
            text: None,
            marks: Vec::new(),
        }
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attrs.insert(name.to_string(), value.into());
        self
    }

    pub fn text(text: &str, marks: Vec<Mark>) -> Self {
        Self {
            kind: "text".to_string(),
            attrs: BTreeMap::new(),
            content: Vec::new(),
            text: Some(text.to_string()),
            marks,
        }
    }

    pub fn paragraph(content: Vec<Node>) -> Self {
        Self::element("paragraph", content)
    }

    pub fn is_text(&self) -> bool {
        self.kind == "text"
    }

    fn collect_text(&self, out: &mut String) {
        if let Some(text) = &self.text {
            out.push_str(text);
        }
        for child in &self.content {
            child.collect_text(out);
        }
        if self.kind != "text" && self.kind != "hardBreak" && self.kind != "doc" {
            out.push('\n');
        }
    }
}

/// Canonical structured representation of a panel's content.
///
/// The root node is always a `doc`. Serialization is deterministic (attribute
/// maps are ordered), so byte equality of [`CanonicalTree::to_bytes`] is the
/// definition of content equality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalTree(Node);

impl CanonicalTree {
    /// Wrap a root node. Non-`doc` roots are wrapped in a `doc`.
    pub fn from_node(node: Node) -> Self {
        if node.kind == "doc" {
            Self(node)
        } else {
            Self(Node::element("doc", vec![node]))
        }
    }

    /// An empty document: one empty paragraph.
    pub fn empty() -> Self {
        Self(Node::element("doc", vec![Node::paragraph(Vec::new())]))
    }

    /// Parse markup straight into a tree.
    pub fn from_markup(markup: &str) -> Result<Self> {
        parse::parse_markup(markup)
    }

    pub fn root(&self) -> &Node {
        &self.0
    }

    /// Deterministic serialization used for equality and hashing.
    pub fn to_bytes(&self) -> Vec<u8> {
        // Trees only hold string keys and JSON values, so this cannot fail.
        serde_json::to_vec(&self.0).unwrap_or_default()
    }

    pub fn hash(&self) -> ContentHash {
        ContentHash::from_bytes(&self.to_bytes())
    }

    /// Plain text of the document, one line per block.
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        self.0.collect_text(&mut out);
        out.trim_end_matches('\n').to_string()
    }
}

/// Content as it crosses a boundary: either markup or an already-structured tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Content {
    Markup(String),
    Tree(CanonicalTree),
}

impl Content {
    pub fn markup(markup: impl Into<String>) -> Self {
        Content::Markup(markup.into())
    }
}

impl From<CanonicalTree> for Content {
    fn from(tree: CanonicalTree) -> Self {
        Content::Tree(tree)
    }
}

/// Normalize content into its canonical tree.
///
/// Markup is parsed with the edit surface's schema. Trees are checked against
/// the same schema and then normalized the way the parser would have built
/// them, so a canonical tree comes back unchanged. A failure means the caller
/// cannot judge whether overwriting is safe and must leave the edit surface
/// alone.
pub fn canonicalize(input: &Content) -> Result<CanonicalTree> {
    match input {
        Content::Tree(tree) => {
            schema::validate(tree.root())?;
            parse::parse_markup(&render_markup(tree))
        }
        Content::Markup(markup) => parse::parse_markup(markup),
    }
}

/// Hash of canonical content, used only for equality checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Compute hash from canonical bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Hash canonical content.
pub fn hash(content: &CanonicalTree) -> ContentHash {
    content.hash()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_tree_input_is_returned_unchanged() {
        let tree = CanonicalTree::from_markup(
            r#"<h3>T</h3><p><a href="x"><em>a</em></a><br>b</p><ol><li><p>i</p></li></ol>"#,
        )
        .unwrap();
        let out = canonicalize(&Content::Tree(tree.clone())).unwrap();
        assert_eq!(out.to_bytes(), tree.to_bytes());
    }

    #[test]
    fn test_tree_outside_schema_is_rejected() {
        let tree = CanonicalTree::from_node(Node::element(
            "doc",
            vec![Node::element("custom", vec![Node::text("kept", vec![])])],
        ));
        assert_eq!(
            canonicalize(&Content::Tree(tree)),
            Err(ContentError::UnsupportedElement("custom".into()))
        );

        let mut marked = Node::text("x", vec![Mark::new("glow")]);
        marked.attrs.insert("color".into(), Value::from("red"));
        let tree = CanonicalTree::from_node(Node::paragraph(vec![marked]));
        assert!(matches!(
            canonicalize(&Content::Tree(tree)),
            Err(ContentError::InvalidNode { .. })
        ));
    }

    #[test]
    fn test_valid_tree_is_normalized() {
        // Split runs and unsorted marks, as a hand-built tree might have them.
        let tree = CanonicalTree::from_node(Node::paragraph(vec![
            Node::text("a", vec![Mark::new("italic"), Mark::new("bold")]),
            Node::text("b", vec![Mark::new("bold"), Mark::new("italic")]),
            Node::text("", vec![]),
        ]));
        let out = canonicalize(&Content::Tree(tree)).unwrap();
        assert_eq!(out, CanonicalTree::from_markup("<p><b><i>ab</i></b></p>").unwrap());
    }

    #[test]
    fn test_canonicalize_is_idempotent() {
        let inputs = [
            Content::markup("<p>Hello <b>world</b></p>"),
            Content::markup("bare text"),
            Content::markup(""),
            Content::markup("<ul><li>one</li><li><p>two</p></li></ul>"),
        ];
        for input in inputs {
            let once = canonicalize(&input).unwrap();
            let twice = canonicalize(&Content::Tree(once.clone())).unwrap();
            assert_eq!(once.to_bytes(), twice.to_bytes());
        }
    }

    #[test]
    fn test_attribute_order_does_not_affect_hash() {
        let a = canonicalize(&Content::markup(r#"<p><a href="x" title="t">link</a></p>"#)).unwrap();
        let b = canonicalize(&Content::markup(r#"<p><a title="t" href="x">link</a></p>"#)).unwrap();
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_mark_nesting_order_does_not_affect_hash() {
        let a = canonicalize(&Content::markup("<p><b><i>x</i></b></p>")).unwrap();
        let b = canonicalize(&Content::markup("<p><em><strong>x</strong></em></p>")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_markup_and_tree_compare_equal() {
        let from_markup = canonicalize(&Content::markup("<p>same</p>")).unwrap();
        let tree = CanonicalTree::from_node(Node::element(
            "doc",
            vec![Node::paragraph(vec![Node::text("same", vec![])])],
        ));
        assert_eq!(from_markup.hash(), canonicalize(&Content::Tree(tree)).unwrap().hash());
    }

    #[test]
    fn test_hash_is_hex_sha256() {
        let hash = CanonicalTree::empty().hash();
        assert_eq!(hash.as_str().len(), 64);
        assert_eq!(hash, CanonicalTree::empty().hash());
    }

    #[test]
    fn test_different_content_different_hash() {
        let a = CanonicalTree::from_markup("hello").unwrap();
        let b = CanonicalTree::from_markup("world").unwrap();
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_content_serializes_as_tagged_union() {
        let markup = serde_json::to_value(Content::markup("<p>x</p>")).unwrap();
        assert_eq!(markup["kind"], "markup");
        assert_eq!(markup["value"], "<p>x</p>");

        let tree = serde_json::to_value(Content::Tree(CanonicalTree::empty())).unwrap();
        assert_eq!(tree["kind"], "tree");
        assert_eq!(tree["value"]["type"], "doc");
        assert_eq!(tree["value"]["content"][0]["type"], "paragraph");
    }

    #[test]
    fn test_malformed_markup_fails() {
        assert!(canonicalize(&Content::markup("<p>unclosed")).is_err());
        assert!(canonicalize(&Content::markup("<p>bad</em></p>")).is_err());
    }

    #[test]
    fn test_plain_text() {
        let tree = CanonicalTree::from_markup("<h1>Title</h1><p>Body</p>").unwrap();
        assert_eq!(tree.plain_text(), "Title\nBody");
    }
}
