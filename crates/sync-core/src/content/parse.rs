//! Markup parser for the edit surface's schema.
//!
//! Tokenizes an HTML subset and builds a normalized [`CanonicalTree`]:
//! marks sorted and deduplicated, adjacent text runs with equal marks merged,
//! whitespace-only text between blocks dropped, bare inline content at the top
//! level wrapped in a paragraph.

use super::{normalize_marks, CanonicalTree, ContentError, Mark, Node, Result};
use std::collections::BTreeMap;

/// Attributes carried over from `<a>` onto the link mark.
pub(super) const LINK_ATTRS: &[&str] = &["href", "rel", "target", "title"];

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open {
        name: String,
        attrs: BTreeMap<String, String>,
        self_closing: bool,
    },
    Close(String),
    Text(String),
}

#[derive(Debug, Clone)]
struct Spanned {
    offset: usize,
    token: Token,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Role {
    Block,
    Inline,
}

fn role(name: &str) -> Option<Role> {
    match name {
        "p" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "blockquote" | "ul" | "ol" | "li"
        | "pre" | "hr" => Some(Role::Block),
        "br" | "strong" | "b" | "em" | "i" | "u" | "s" | "del" | "strike" | "code" | "a" => {
            Some(Role::Inline)
        }
        _ => None,
    }
}

fn mark_for(name: &str, attrs: &BTreeMap<String, String>) -> Option<Mark> {
    let mark = match name {
        "strong" | "b" => Mark::new("bold"),
        "em" | "i" => Mark::new("italic"),
        "u" => Mark::new("underline"),
        "s" | "del" | "strike" => Mark::new("strike"),
        "code" => Mark::new("code"),
        "a" => {
            let mut mark = Mark::new("link");
            for (key, value) in attrs {
                if LINK_ATTRS.contains(&key.as_str()) {
                    mark.attrs.insert(key.clone(), value.clone().into());
                }
            }
            mark
        }
        _ => return None,
    };
    Some(mark)
}

/// Parse markup into a canonical tree.
pub(crate) fn parse_markup(input: &str) -> Result<CanonicalTree> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let mut blocks = parser.parse_blocks(None)?;
    if blocks.is_empty() {
        blocks.push(Node::paragraph(Vec::new()));
    }
    Ok(CanonicalTree::from_node(Node::element("doc", blocks)))
}

// ============================================================================
// Tokenizer
// ============================================================================

fn tokenize(input: &str) -> Result<Vec<Spanned>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut text_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'<' {
            i += 1;
            continue;
        }

        if text_start < i {
            tokens.push(Spanned {
                offset: text_start,
                token: Token::Text(decode_entities(&input[text_start..i], text_start)?),
            });
        }

        if input[i..].starts_with("<!--") {
            let end = input[i + 4..]
                .find("-->")
                .ok_or(ContentError::UnterminatedTag(i))?;
            i = i + 4 + end + 3;
            text_start = i;
            continue;
        }

        let end = find_tag_end(bytes, i)?;
        tokens.push(Spanned {
            offset: i,
            token: parse_tag(&input[i + 1..end], i)?,
        });
        i = end + 1;
        text_start = i;
    }

    if text_start < bytes.len() {
        tokens.push(Spanned {
            offset: text_start,
            token: Token::Text(decode_entities(&input[text_start..], text_start)?),
        });
    }

    Ok(tokens)
}

/// Index of the `>` closing the tag that starts at `start`, skipping quoted values.
fn find_tag_end(bytes: &[u8], start: usize) -> Result<usize> {
    let mut quote: Option<u8> = None;
    for (i, &b) in bytes.iter().enumerate().skip(start + 1) {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => return Ok(i),
            None => {}
        }
    }
    Err(ContentError::UnterminatedTag(start))
}

fn parse_tag(inner: &str, offset: usize) -> Result<Token> {
    let inner = inner.trim();
    if let Some(name) = inner.strip_prefix('/') {
        let name = name.trim().to_ascii_lowercase();
        if !is_valid_name(&name) {
            return Err(ContentError::MalformedTag(offset));
        }
        return Ok(Token::Close(name));
    }

    let (inner, self_closing) = match inner.strip_suffix('/') {
        Some(rest) => (rest.trim_end(), true),
        None => (inner, false),
    };

    let name_end = inner
        .find(|c: char| c.is_ascii_whitespace())
        .unwrap_or(inner.len());
    let name = inner[..name_end].to_ascii_lowercase();
    if !is_valid_name(&name) {
        return Err(ContentError::MalformedTag(offset));
    }

    let attrs = parse_attrs(&inner[name_end..], offset)?;
    Ok(Token::Open {
        name,
        attrs,
        self_closing,
    })
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn parse_attrs(mut rest: &str, offset: usize) -> Result<BTreeMap<String, String>> {
    let mut attrs = BTreeMap::new();
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            return Ok(attrs);
        }

        let key_end = rest
            .find(|c: char| c == '=' || c.is_ascii_whitespace())
            .unwrap_or(rest.len());
        let key = rest[..key_end].to_ascii_lowercase();
        if key.is_empty() {
            return Err(ContentError::MalformedTag(offset));
        }
        rest = rest[key_end..].trim_start();

        let Some(after_eq) = rest.strip_prefix('=') else {
            attrs.insert(key, String::new());
            continue;
        };
        let after_eq = after_eq.trim_start();

        let (raw, remaining) = match after_eq.chars().next() {
            Some(q @ ('"' | '\'')) => {
                let body = &after_eq[1..];
                let close = body.find(q).ok_or(ContentError::MalformedTag(offset))?;
                (&body[..close], &body[close + 1..])
            }
            Some(_) => {
                let end = after_eq
                    .find(|c: char| c.is_ascii_whitespace())
                    .unwrap_or(after_eq.len());
                (&after_eq[..end], &after_eq[end..])
            }
            None => return Err(ContentError::MalformedTag(offset)),
        };

        attrs.insert(key, decode_entities(raw, offset)?);
        rest = remaining;
    }
}

fn decode_entities(raw: &str, offset: usize) -> Result<String> {
    if !raw.contains('&') {
        return Ok(raw.to_string());
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    let mut consumed = 0;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let at = offset + consumed + amp;
        let after = &rest[amp + 1..];
        let semi = after
            .find(';')
            .filter(|&semi| semi <= 10)
            .ok_or(ContentError::MalformedEntity(at))?;

        let ch = match &after[..semi] {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some('\u{a0}'),
            name => match name.strip_prefix('#') {
                Some(hex) if hex.starts_with(['x', 'X']) => u32::from_str_radix(&hex[1..], 16)
                    .ok()
                    .and_then(char::from_u32),
                Some(dec) => dec.parse::<u32>().ok().and_then(char::from_u32),
                None => None,
            },
        };
        out.push(ch.ok_or(ContentError::MalformedEntity(at))?);

        consumed += amp + 1 + semi + 1;
        rest = &after[semi + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

// ============================================================================
// Tree builder
// ============================================================================

/// What the next token is, without holding a borrow on the token list.
enum Step {
    Close(String, usize),
    Text { blank: bool },
    Open(String),
    End,
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn step(&self) -> Step {
        match self.tokens.get(self.pos) {
            None => Step::End,
            Some(Spanned {
                offset,
                token: Token::Close(name),
            }) => Step::Close(name.clone(), *offset),
            Some(Spanned {
                token: Token::Text(text),
                ..
            }) => Step::Text {
                blank: text.trim().is_empty(),
            },
            Some(Spanned {
                token: Token::Open { name, .. },
                ..
            }) => Step::Open(name.clone()),
        }
    }

    fn take_open(&mut self) -> (String, BTreeMap<String, String>, bool) {
        let token = self.tokens[self.pos].token.clone();
        self.pos += 1;
        match token {
            Token::Open {
                name,
                attrs,
                self_closing,
            } => (name, attrs, self_closing),
            _ => unreachable!("take_open called on a non-open token"),
        }
    }

    fn take_text(&mut self) -> String {
        let token = self.tokens[self.pos].token.clone();
        self.pos += 1;
        match token {
            Token::Text(text) => text,
            _ => unreachable!("take_text called on a non-text token"),
        }
    }

    /// Parse block content until `</parent>` (or end of input at top level).
    fn parse_blocks(&mut self, parent: Option<&str>) -> Result<Vec<Node>> {
        let mut blocks = Vec::new();
        let mut run: Vec<Node> = Vec::new();

        loop {
            match self.step() {
                Step::End => {
                    if let Some(parent) = parent {
                        return Err(ContentError::Unclosed(parent.to_string()));
                    }
                    flush_run(&mut run, &mut blocks);
                    return Ok(blocks);
                }
                Step::Close(name, offset) => {
                    if parent == Some(name.as_str()) {
                        self.pos += 1;
                        flush_run(&mut run, &mut blocks);
                        return Ok(blocks);
                    }
                    return Err(ContentError::UnexpectedClose {
                        found: name,
                        offset,
                    });
                }
                Step::Text { blank: true } if run.is_empty() => {
                    self.pos += 1;
                }
                Step::Text { .. } => {
                    let text = self.take_text();
                    run.push(Node::text(&text, Vec::new()));
                }
                Step::Open(name) => match role(&name) {
                    Some(Role::Block) => {
                        flush_run(&mut run, &mut blocks);
                        blocks.push(self.parse_block(parent.unwrap_or("doc"))?);
                    }
                    Some(Role::Inline) => self.parse_inline_element(&[], &mut run)?,
                    None => return Err(ContentError::UnsupportedElement(name)),
                },
            }
        }
    }

    fn parse_block(&mut self, parent: &str) -> Result<Node> {
        let (name, _attrs, self_closing) = self.take_open();
        let node = match name.as_str() {
            "p" => Node::paragraph(self.parse_inline_body("p", self_closing)?),
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = u64::from(name.as_bytes()[1] - b'0');
                Node::element("heading", self.parse_inline_body(&name, self_closing)?)
                    .with_attr("level", level)
            }
            "blockquote" => {
                let content = if self_closing {
                    Vec::new()
                } else {
                    self.parse_blocks(Some("blockquote"))?
                };
                Node::element("blockquote", content)
            }
            "ul" | "ol" => {
                let kind = if name == "ul" { "bulletList" } else { "orderedList" };
                let items = if self_closing {
                    Vec::new()
                } else {
                    self.parse_list(&name)?
                };
                Node::element(kind, items)
            }
            "pre" => {
                let text = if self_closing {
                    String::new()
                } else {
                    self.parse_preformatted()?
                };
                let content = if text.is_empty() {
                    Vec::new()
                } else {
                    vec![Node::text(&text, Vec::new())]
                };
                Node::element("codeBlock", content)
            }
            "hr" => Node::element("horizontalRule", Vec::new()),
            other => {
                return Err(ContentError::Misplaced {
                    child: other.to_string(),
                    parent: parent.to_string(),
                });
            }
        };
        Ok(node)
    }

    fn parse_list(&mut self, list: &str) -> Result<Vec<Node>> {
        let mut items = Vec::new();
        loop {
            match self.step() {
                Step::End => return Err(ContentError::Unclosed(list.to_string())),
                Step::Close(name, offset) => {
                    if name == list {
                        self.pos += 1;
                        return Ok(items);
                    }
                    return Err(ContentError::UnexpectedClose {
                        found: name,
                        offset,
                    });
                }
                Step::Text { blank: true } => self.pos += 1,
                Step::Text { blank: false } => {
                    return Err(ContentError::Misplaced {
                        child: "text".to_string(),
                        parent: list.to_string(),
                    });
                }
                Step::Open(name) if name == "li" => {
                    let (_, _, self_closing) = self.take_open();
                    let content = if self_closing {
                        Vec::new()
                    } else {
                        self.parse_blocks(Some("li"))?
                    };
                    items.push(Node::element("listItem", content));
                }
                Step::Open(name) => {
                    return Err(ContentError::Misplaced {
                        child: name,
                        parent: list.to_string(),
                    });
                }
            }
        }
    }

    /// Raw text of a `<pre>` block; a wrapping `<code>` is transparent.
    fn parse_preformatted(&mut self) -> Result<String> {
        let mut text = String::new();
        loop {
            match self.step() {
                Step::End => return Err(ContentError::Unclosed("pre".to_string())),
                Step::Close(name, _) if name == "pre" => {
                    self.pos += 1;
                    return Ok(text);
                }
                Step::Close(name, _) if name == "code" => self.pos += 1,
                Step::Close(name, offset) => {
                    return Err(ContentError::UnexpectedClose {
                        found: name,
                        offset,
                    });
                }
                Step::Open(name) if name == "code" => self.pos += 1,
                Step::Open(name) => {
                    return Err(ContentError::Misplaced {
                        child: name,
                        parent: "pre".to_string(),
                    });
                }
                Step::Text { .. } => text.push_str(&self.take_text()),
            }
        }
    }

    fn parse_inline_body(&mut self, end: &str, self_closing: bool) -> Result<Vec<Node>> {
        let mut out = Vec::new();
        if !self_closing {
            self.parse_inline_until(end, &[], &mut out)?;
        }
        Ok(merge_text(out))
    }

    fn parse_inline_until(&mut self, end: &str, marks: &[Mark], out: &mut Vec<Node>) -> Result<()> {
        loop {
            match self.step() {
                Step::End => return Err(ContentError::Unclosed(end.to_string())),
                Step::Close(name, offset) => {
                    if name == end {
                        self.pos += 1;
                        return Ok(());
                    }
                    return Err(ContentError::UnexpectedClose {
                        found: name,
                        offset,
                    });
                }
                Step::Text { .. } => {
                    let text = self.take_text();
                    out.push(Node::text(&text, marks.to_vec()));
                }
                Step::Open(name) => match role(&name) {
                    Some(Role::Inline) => self.parse_inline_element(marks, out)?,
                    Some(Role::Block) => {
                        return Err(ContentError::Misplaced {
                            child: name,
                            parent: end.to_string(),
                        });
                    }
                    None => return Err(ContentError::UnsupportedElement(name)),
                },
            }
        }
    }

    fn parse_inline_element(&mut self, marks: &[Mark], out: &mut Vec<Node>) -> Result<()> {
        let (name, attrs, self_closing) = self.take_open();
        if name == "br" {
            out.push(Node::element("hardBreak", Vec::new()));
            return Ok(());
        }

        let Some(mark) = mark_for(&name, &attrs) else {
            return Err(ContentError::UnsupportedElement(name));
        };
        if self_closing {
            return Ok(());
        }

        let mut nested = marks.to_vec();
        nested.push(mark);
        normalize_marks(&mut nested);
        self.parse_inline_until(&name, &nested, out)
    }
}

/// Close an implicit paragraph collected from bare inline content.
fn flush_run(run: &mut Vec<Node>, blocks: &mut Vec<Node>) {
    while run
        .last()
        .is_some_and(|n| n.is_text() && n.text.as_deref().is_some_and(|t| t.trim().is_empty()))
    {
        run.pop();
    }
    if run.is_empty() {
        return;
    }
    blocks.push(Node::paragraph(merge_text(std::mem::take(run))));
}

/// Merge adjacent text nodes carrying the same marks and drop empty ones.
fn merge_text(nodes: Vec<Node>) -> Vec<Node> {
    let mut merged: Vec<Node> = Vec::with_capacity(nodes.len());
    for node in nodes {
        if node.is_text() {
            let text = node.text.as_deref().unwrap_or_default();
            if text.is_empty() {
                continue;
            }
            if let Some(last) = merged.last_mut() {
                if last.is_text() && last.marks == node.marks {
                    last.text.get_or_insert_with(String::new).push_str(text);
                    continue;
                }
            }
        }
        merged.push(node);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(markup: &str) -> serde_json::Value {
        serde_json::to_value(parse_markup(markup).unwrap()).unwrap()
    }

    #[test]
    fn test_bare_text_becomes_paragraph() {
        assert_eq!(
            parse("x"),
            json!({"type": "doc", "content": [
                {"type": "paragraph", "content": [{"type": "text", "text": "x"}]}
            ]})
        );
    }

    #[test]
    fn test_empty_markup_is_empty_paragraph() {
        assert_eq!(
            parse("  \n "),
            json!({"type": "doc", "content": [{"type": "paragraph"}]})
        );
    }

    #[test]
    fn test_heading_and_marks() {
        assert_eq!(
            parse("<h2>Title</h2><p>a <strong>b</strong></p>"),
            json!({"type": "doc", "content": [
                {"type": "heading", "attrs": {"level": 2}, "content": [{"type": "text", "text": "Title"}]},
                {"type": "paragraph", "content": [
                    {"type": "text", "text": "a "},
                    {"type": "text", "text": "b", "marks": [{"type": "bold"}]}
                ]}
            ]})
        );
    }

    #[test]
    fn test_adjacent_equal_marks_merge() {
        let merged = parse("<p><b>ab</b></p>");
        let split = parse("<p><b>a</b><strong>b</strong></p>");
        assert_eq!(merged, split);
    }

    #[test]
    fn test_whitespace_between_blocks_is_dropped() {
        assert_eq!(parse("<p>a</p>\n  <p>b</p>\n"), parse("<p>a</p><p>b</p>"));
    }

    #[test]
    fn test_list_items_hold_paragraphs() {
        assert_eq!(
            parse("<ul>\n<li>one</li>\n</ul>"),
            json!({"type": "doc", "content": [
                {"type": "bulletList", "content": [
                    {"type": "listItem", "content": [
                        {"type": "paragraph", "content": [{"type": "text", "text": "one"}]}
                    ]}
                ]}
            ]})
        );
    }

    #[test]
    fn test_link_keeps_known_attributes() {
        let value = parse(r#"<p><a class="x" href="https://example.com">go</a></p>"#);
        assert_eq!(
            value["content"][0]["content"][0]["marks"],
            json!([{"type": "link", "attrs": {"href": "https://example.com"}}])
        );
    }

    #[test]
    fn test_entities_are_decoded() {
        let value = parse("<p>a &amp; b &lt;c&gt; &#65;&#x42;</p>");
        assert_eq!(value["content"][0]["content"][0]["text"], "a & b <c> AB");
    }

    #[test]
    fn test_pre_keeps_raw_text() {
        let value = parse("<pre><code>fn main() {\n}</code></pre>");
        assert_eq!(value["content"][0]["type"], "codeBlock");
        assert_eq!(value["content"][0]["content"][0]["text"], "fn main() {\n}");
    }

    #[test]
    fn test_void_elements() {
        let value = parse("<p>a<br>b</p><hr>");
        assert_eq!(value["content"][0]["content"][1]["type"], "hardBreak");
        assert_eq!(value["content"][1]["type"], "horizontalRule");
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(parse("<p>a<!-- note -->b</p>"), parse("<p>ab</p>"));
    }

    #[test]
    fn test_failures() {
        assert_eq!(
            parse_markup("<p>text").unwrap_err(),
            ContentError::Unclosed("p".into())
        );
        assert_eq!(parse_markup("<p").unwrap_err(), ContentError::UnterminatedTag(0));
        assert!(matches!(
            parse_markup("<p>x</b>").unwrap_err(),
            ContentError::UnexpectedClose { .. }
        ));
        assert_eq!(
            parse_markup("<video></video>").unwrap_err(),
            ContentError::UnsupportedElement("video".into())
        );
        assert!(matches!(
            parse_markup("<p><ul></ul></p>").unwrap_err(),
            ContentError::Misplaced { .. }
        ));
        assert_eq!(
            parse_markup("a &bogus; b").unwrap_err(),
            ContentError::MalformedEntity(2)
        );
    }
}
