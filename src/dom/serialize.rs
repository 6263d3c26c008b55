//! Serialization of a [`Fragment`](super::Fragment) back to markup.

use ego_tree::NodeRef;

use super::DomNode;

/// HTML5 void elements that must not have a closing tag.
pub const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Elements whose text is emitted verbatim.
const RAW_TEXT_ELEMENTS: &[&str] = &["style", "script"];

/// Elements whose whitespace is significant.
const PREFORMATTED_ELEMENTS: &[&str] = &["pre", "textarea"];

/// Attributes written without a value when their value is empty.
const BOOLEAN_ATTRIBUTES: &[&str] = &[
    "muted", "autoplay", "loop", "controls", "playsinline", "hidden", "defer", "async",
];

/// Knobs for [`Fragment::render`](super::Fragment::render).
#[derive(Clone, Debug, Default)]
pub struct SerializeOptions {
    /// Collapse whitespace runs in text nodes to one space.
    pub collapse_whitespace: bool,
    /// Drop comment nodes from the output.
    pub skip_comments: bool,
}

pub(super) fn serialize_node(node: NodeRef<DomNode>, options: &SerializeOptions, out: &mut String) {
    serialize_inner(node, options, false, false, out);
}

fn serialize_inner(
    node: NodeRef<DomNode>,
    options: &SerializeOptions,
    raw: bool,
    preformatted: bool,
    out: &mut String,
) {
    match node.value() {
        DomNode::Root => {
            for child in node.children() {
                serialize_inner(child, options, raw, preformatted, out);
            }
        }
        DomNode::Element(el) => {
            let tag = el.name.as_str();
            out.push('<');
            out.push_str(tag);

            for (k, v) in &el.attrs {
                out.push(' ');
                out.push_str(k);
                if v.is_empty() && BOOLEAN_ATTRIBUTES.contains(&k.as_str()) {
                    continue;
                }
                out.push_str("=\"");
                escape_attr(v, out);
                out.push('"');
            }
            out.push('>');

            if VOID_ELEMENTS.contains(&tag) {
                return;
            }

            let raw = RAW_TEXT_ELEMENTS.contains(&tag);
            let preformatted = preformatted || PREFORMATTED_ELEMENTS.contains(&tag);
            for child in node.children() {
                serialize_inner(child, options, raw, preformatted, out);
            }

            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
        DomNode::Text(text) => {
            if raw {
                out.push_str(text);
            } else if options.collapse_whitespace && !preformatted {
                escape_text(&collapse(text), out);
            } else {
                escape_text(text, out);
            }
        }
        DomNode::Comment(comment) => {
            if options.skip_comments {
                return;
            }
            out.push_str("<!--");
            out.push_str(comment);
            out.push_str("-->");
        }
    }
}

fn collapse(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(c),
        }
    }
}

fn escape_attr(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::Fragment;
    use super::*;

    #[test]
    fn void_elements_have_no_closing_tag() {
        let fragment = Fragment::parse(r#"<p>a<br>b</p><img src="x.jpg">"#);
        assert_eq!(fragment.to_html(), r#"<p>a<br>b</p><img src="x.jpg">"#);
    }

    #[test]
    fn text_and_attributes_are_escaped() {
        let fragment = Fragment::parse(r#"<a title="say &quot;hi&quot;">1 &lt; 2 &amp; 3</a>"#);
        assert_eq!(
            fragment.to_html(),
            r#"<a title="say &quot;hi&quot;">1 &lt; 2 &amp; 3</a>"#
        );
    }

    #[test]
    fn style_content_is_not_escaped() {
        let fragment = Fragment::parse("<style>a > b { color: red }</style>");
        assert_eq!(fragment.to_html(), "<style>a > b { color: red }</style>");
    }

    #[test]
    fn collapse_and_skip_comments() {
        let fragment = Fragment::parse("<p>  lots \n of   space <!-- note --></p><pre>  kept  </pre>");
        let options = SerializeOptions {
            collapse_whitespace: true,
            skip_comments: true,
        };
        assert_eq!(fragment.render(&options), "<p> lots of space </p><pre>  kept  </pre>");
    }

    #[test]
    fn boolean_attributes_are_bare() {
        let mut fragment = Fragment::parse(r#"<video src="a.mp4"></video>"#);
        let id = fragment.elements_named("video")[0];
        fragment.update_element(id, |el| el.set_attr("muted", ""));
        assert_eq!(fragment.to_html(), r#"<video src="a.mp4" muted></video>"#);
    }
}
