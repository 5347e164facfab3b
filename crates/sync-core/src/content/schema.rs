//! Schema check for trees that arrive already structured.
//!
//! Markup can only produce schema nodes, but a tree payload can hold anything.
//! A node the edit surface cannot render would never compare equal to what
//! the surface reports back, so such trees are rejected up front.

use super::parse::LINK_ATTRS;
use super::{ContentError, Mark, Node, Result};

const BLOCKS: &[&str] = &[
    "paragraph",
    "heading",
    "blockquote",
    "bulletList",
    "orderedList",
    "listItem",
    "codeBlock",
    "horizontalRule",
];
const INLINES: &[&str] = &["text", "hardBreak"];

fn invalid(node: &str, reason: impl Into<String>) -> ContentError {
    ContentError::InvalidNode {
        node: node.to_string(),
        reason: reason.into(),
    }
}

fn misplaced(child: &str, parent: &str) -> ContentError {
    if BLOCKS.contains(&child) || INLINES.contains(&child) || child == "doc" {
        ContentError::Misplaced {
            child: child.to_string(),
            parent: parent.to_string(),
        }
    } else {
        ContentError::UnsupportedElement(child.to_string())
    }
}

/// Check that `root` is a `doc` built only from schema nodes and marks.
pub(crate) fn validate(root: &Node) -> Result<()> {
    if root.kind != "doc" {
        return Err(invalid(&root.kind, "root must be a doc"));
    }
    bare_element(root)?;
    blocks(&root.content, "doc")
}

/// Element nodes carry no text or marks.
fn bare_element(node: &Node) -> Result<()> {
    if node.text.is_some() {
        return Err(invalid(&node.kind, "only text nodes carry text"));
    }
    if !node.marks.is_empty() {
        return Err(invalid(&node.kind, "only text nodes carry marks"));
    }
    Ok(())
}

fn no_attrs(node: &Node) -> Result<()> {
    match node.attrs.keys().next() {
        Some(name) => Err(invalid(&node.kind, format!("unexpected attribute {name}"))),
        None => Ok(()),
    }
}

fn blocks(nodes: &[Node], parent: &str) -> Result<()> {
    for node in nodes {
        block(node, parent)?;
    }
    Ok(())
}

fn block(node: &Node, parent: &str) -> Result<()> {
    match node.kind.as_str() {
        "paragraph" => {
            bare_element(node)?;
            no_attrs(node)?;
            inlines(&node.content, "paragraph")
        }
        "heading" => {
            bare_element(node)?;
            let level = node.attrs.get("level").and_then(|v| v.as_u64());
            if !matches!(level, Some(1..=6)) || node.attrs.len() != 1 {
                return Err(invalid("heading", "needs a level from 1 to 6 and nothing else"));
            }
            inlines(&node.content, "heading")
        }
        "blockquote" => {
            bare_element(node)?;
            no_attrs(node)?;
            blocks(&node.content, "blockquote")
        }
        "bulletList" | "orderedList" => {
            bare_element(node)?;
            no_attrs(node)?;
            for item in &node.content {
                if item.kind != "listItem" {
                    return Err(misplaced(&item.kind, &node.kind));
                }
                bare_element(item)?;
                no_attrs(item)?;
                blocks(&item.content, "listItem")?;
            }
            Ok(())
        }
        "codeBlock" => {
            bare_element(node)?;
            no_attrs(node)?;
            for child in &node.content {
                if !child.is_text() {
                    return Err(misplaced(&child.kind, "codeBlock"));
                }
                if !child.marks.is_empty() {
                    return Err(invalid("codeBlock", "code text carries no marks"));
                }
                text(child)?;
            }
            Ok(())
        }
        "horizontalRule" => {
            bare_element(node)?;
            no_attrs(node)?;
            if !node.content.is_empty() {
                return Err(invalid("horizontalRule", "has no content"));
            }
            Ok(())
        }
        other => Err(misplaced(other, parent)),
    }
}

fn inlines(nodes: &[Node], parent: &str) -> Result<()> {
    for node in nodes {
        match node.kind.as_str() {
            "text" => {
                text(node)?;
                for mark in &node.marks {
                    self::mark(mark)?;
                }
            }
            "hardBreak" => {
                bare_element(node)?;
                no_attrs(node)?;
                if !node.content.is_empty() {
                    return Err(invalid("hardBreak", "has no content"));
                }
            }
            other => return Err(misplaced(other, parent)),
        }
    }
    Ok(())
}

fn text(node: &Node) -> Result<()> {
    no_attrs(node)?;
    if node.text.is_none() {
        return Err(invalid("text", "missing text"));
    }
    if !node.content.is_empty() {
        return Err(invalid("text", "text nodes have no children"));
    }
    Ok(())
}

fn mark(mark: &Mark) -> Result<()> {
    match mark.kind.as_str() {
        "bold" | "italic" | "underline" | "strike" | "code" => match mark.attrs.keys().next() {
            Some(name) => Err(invalid(&mark.kind, format!("unexpected attribute {name}"))),
            None => Ok(()),
        },
        "link" => {
            for (name, value) in &mark.attrs {
                if !LINK_ATTRS.contains(&name.as_str()) || !value.is_string() {
                    return Err(invalid("link", format!("unsupported attribute {name}")));
                }
            }
            Ok(())
        }
        other => Err(invalid(other, "unsupported mark")),
    }
}
