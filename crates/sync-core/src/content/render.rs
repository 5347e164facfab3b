//! Render a canonical tree back into edit-surface markup.

use super::{CanonicalTree, Mark, Node};

/// Render a tree as markup. Parsing the result yields the same tree for any
/// tree the markup parser produced.
pub fn render_markup(tree: &CanonicalTree) -> String {
    let mut out = String::new();
    render_blocks(&tree.root().content, &mut out);
    out
}

fn render_blocks(nodes: &[Node], out: &mut String) {
    for node in nodes {
        render_block(node, out);
    }
}

fn render_block(node: &Node, out: &mut String) {
    match node.kind.as_str() {
        "paragraph" => wrap(out, "p", |out| render_inline(&node.content, out)),
        "heading" => {
            let level = node
                .attrs
                .get("level")
                .and_then(|v| v.as_u64())
                .unwrap_or(1)
                .clamp(1, 6);
            let tag = format!("h{level}");
            wrap(out, &tag, |out| render_inline(&node.content, out));
        }
        "blockquote" => wrap(out, "blockquote", |out| render_blocks(&node.content, out)),
        "bulletList" | "orderedList" => {
            let tag = if node.kind == "bulletList" { "ul" } else { "ol" };
            wrap(out, tag, |out| {
                for item in &node.content {
                    wrap(out, "li", |out| render_blocks(&item.content, out));
                }
            });
        }
        "codeBlock" => {
            out.push_str("<pre><code>");
            for child in &node.content {
                if let Some(text) = &child.text {
                    escape_into(text, out);
                }
            }
            out.push_str("</code></pre>");
        }
        "horizontalRule" => out.push_str("<hr>"),
        // Unknown block types only occur in trees that did not come from
        // markup; keep their text in a paragraph.
        _ => wrap(out, "p", |out| render_inline(&node.content, out)),
    }
}

fn render_inline(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node.kind.as_str() {
            "text" => {
                for mark in &node.marks {
                    open_mark(mark, out);
                }
                escape_into(node.text.as_deref().unwrap_or_default(), out);
                for mark in node.marks.iter().rev() {
                    out.push_str("</");
                    out.push_str(mark_tag(mark));
                    out.push('>');
                }
            }
            "hardBreak" => out.push_str("<br>"),
            _ => render_inline(&node.content, out),
        }
    }
}

fn wrap(out: &mut String, tag: &str, body: impl FnOnce(&mut String)) {
    out.push('<');
    out.push_str(tag);
    out.push('>');
    body(out);
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}

fn mark_tag(mark: &Mark) -> &'static str {
    match mark.kind.as_str() {
        "bold" => "strong",
        "italic" => "em",
        "underline" => "u",
        "strike" => "s",
        "code" => "code",
        "link" => "a",
        _ => "span",
    }
}

fn open_mark(mark: &Mark, out: &mut String) {
    out.push('<');
    out.push_str(mark_tag(mark));
    for (name, value) in &mark.attrs {
        let value = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        escape_into(&value, out);
        out.push('"');
    }
    out.push('>');
}

fn escape_into(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(markup: &str) {
        let tree = CanonicalTree::from_markup(markup).unwrap();
        let rendered = render_markup(&tree);
        let reparsed = CanonicalTree::from_markup(&rendered).unwrap();
        assert_eq!(tree, reparsed, "rendered as {rendered}");
    }

    #[test]
    fn test_render_simple_paragraph() {
        let tree = CanonicalTree::from_markup("hello").unwrap();
        assert_eq!(render_markup(&tree), "<p>hello</p>");
    }

    #[test]
    fn test_render_escapes_text() {
        let tree = CanonicalTree::from_markup("<p>a &lt; b &amp; c</p>").unwrap();
        assert_eq!(render_markup(&tree), "<p>a &lt; b &amp; c</p>");
    }

    #[test]
    fn test_render_nested_marks_in_canonical_order() {
        let tree = CanonicalTree::from_markup("<p><i><b>x</b></i></p>").unwrap();
        assert_eq!(render_markup(&tree), "<p><strong><em>x</em></strong></p>");
    }

    #[test]
    fn test_parsed_trees_survive_rendering() {
        roundtrip("<h1>Title</h1><p>Body with <a href=\"/n?a=1&amp;b=2\">link</a></p>");
        roundtrip("<blockquote><p>quoted</p></blockquote><hr>");
        roundtrip("<ol><li>one</li><li><p>two <code>x</code></p></li></ol>");
        roundtrip("<pre><code>a &lt; b</code></pre>");
        roundtrip("<p>line<br>break</p><p></p>");
        roundtrip("");
    }
}
