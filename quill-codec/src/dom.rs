//! Lightweight DOM tree used as the interchange form between HTML text,
//! the block transforms, and the document schema.
//!
//! Parsing goes through `scraper` (html5ever); serialization is our own
//! writer so that output bytes are fully deterministic. The writer emits
//! no indentation or inter-element whitespace except for the canonical
//! envelope.

use scraper::node::Node;
use scraper::Html;

/// Elements serialized without a closing tag.
const VOID_ELEMENTS: &[&str] = &["br", "hr", "img", "source"];

/// A node in the interchange tree.
#[derive(Debug, Clone, PartialEq)]
pub enum HtmlNode {
    Element(Element),
    Text(String),
}

impl HtmlNode {
    /// The element payload, if this node is an element.
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            HtmlNode::Element(el) => Some(el),
            HtmlNode::Text(_) => None,
        }
    }

    /// True for text nodes consisting only of whitespace.
    pub fn is_blank_text(&self) -> bool {
        match self {
            HtmlNode::Text(t) => t.chars().all(|c| c.is_whitespace()),
            HtmlNode::Element(_) => false,
        }
    }
}

/// An element with ordered attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<HtmlNode>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_children(tag: impl Into<String>, children: Vec<HtmlNode>) -> Self {
        Self {
            tag: tag.into(),
            attrs: Vec::new(),
            children,
        }
    }

    /// Append an attribute, preserving emission order.
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attrs.push((name.into(), value.into()));
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Child elements, skipping text nodes.
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(HtmlNode::as_element)
    }

    /// The concatenated text of this subtree.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(&self.children, &mut out);
        out
    }
}

fn collect_text(nodes: &[HtmlNode], out: &mut String) {
    for node in nodes {
        match node {
            HtmlNode::Text(t) => out.push_str(t),
            HtmlNode::Element(el) => collect_text(&el.children, out),
        }
    }
}

// ─── Parsing ──────────────────────────────────────────────────────────

/// Parse an HTML document and return the children of `<body>`.
///
/// html5ever always synthesizes `html > head + body`, so content handed
/// to us as a bare `<main>` still lands under body.
pub fn parse_html(input: &str) -> Vec<HtmlNode> {
    let parsed = Html::parse_document(input);
    let mut converted = Vec::new();
    for child in parsed.tree.root().children() {
        if let Some(node) = convert(child) {
            converted.push(node);
        }
    }
    if let Some(body) = find_element(&converted, "body") {
        body.children.clone()
    } else {
        converted
    }
}

fn convert(node: ego_tree::NodeRef<'_, Node>) -> Option<HtmlNode> {
    match node.value() {
        Node::Element(el) => {
            let mut element = Element::new(el.name());
            for (name, value) in el.attrs() {
                element.attrs.push((name.to_string(), value.to_string()));
            }
            for child in node.children() {
                if let Some(converted) = convert(child) {
                    element.children.push(converted);
                }
            }
            Some(HtmlNode::Element(element))
        }
        Node::Text(text) => Some(HtmlNode::Text(text.text.to_string())),
        _ => None,
    }
}

/// Depth-first search for the first element with the given tag.
pub fn find_element<'a>(nodes: &'a [HtmlNode], tag: &str) -> Option<&'a Element> {
    for node in nodes {
        if let HtmlNode::Element(el) = node {
            if el.tag == tag {
                return Some(el);
            }
            if let Some(found) = find_element(&el.children, tag) {
                return Some(found);
            }
        }
    }
    None
}

// ─── Serialization ────────────────────────────────────────────────────

/// Render nodes back to HTML text with no added whitespace.
pub fn render(nodes: &[HtmlNode]) -> String {
    let mut out = String::new();
    for node in nodes {
        write_node(&mut out, node);
    }
    out
}

/// Render section elements inside the canonical body envelope.
pub fn render_envelope(sections: &[HtmlNode]) -> String {
    format!(
        "\n<body>\n  <header></header>\n  <main>{}</main>\n  <footer></footer>\n</body>\n",
        render(sections)
    )
}

fn write_node(out: &mut String, node: &HtmlNode) {
    match node {
        HtmlNode::Text(text) => out.push_str(&escape_text(text)),
        HtmlNode::Element(el) => {
            out.push('<');
            out.push_str(&el.tag);
            for (name, value) in &el.attrs {
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                out.push_str(&escape_attr(value));
                out.push('"');
            }
            out.push('>');
            if VOID_ELEMENTS.contains(&el.tag.as_str()) {
                return;
            }
            for child in &el.children {
                write_node(out, child);
            }
            out.push_str("</");
            out.push_str(&el.tag);
            out.push('>');
        }
    }
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_finds_body_children() {
        let nodes = parse_html("<body><main><div><p>hi</p></div></main></body>");
        assert_eq!(nodes.len(), 1);
        let main = nodes[0].as_element().unwrap();
        assert_eq!(main.tag, "main");
    }

    #[test]
    fn test_parse_bare_main() {
        let nodes = parse_html("<main></main>");
        let main = find_element(&nodes, "main").unwrap();
        assert!(main.children.is_empty());
    }

    #[test]
    fn test_parse_preserves_custom_elements() {
        let nodes = parse_html("<main><div><da-loc-added><h1>New</h1></da-loc-added></div></main>");
        let added = find_element(&nodes, "da-loc-added").unwrap();
        assert_eq!(added.child_elements().next().unwrap().tag, "h1");
    }

    #[test]
    fn test_render_simple() {
        let mut p = Element::new("p");
        p.children.push(HtmlNode::Text("hello".into()));
        assert_eq!(render(&[HtmlNode::Element(p)]), "<p>hello</p>");
    }

    #[test]
    fn test_render_void_elements() {
        let mut img = Element::new("img");
        img.set_attr("src", "/a.png");
        assert_eq!(render(&[HtmlNode::Element(img)]), "<img src=\"/a.png\">");
        assert_eq!(render(&[HtmlNode::Element(Element::new("br"))]), "<br>");
        assert_eq!(render(&[HtmlNode::Element(Element::new("hr"))]), "<hr>");
    }

    #[test]
    fn test_render_escapes() {
        let mut a = Element::new("a");
        a.set_attr("href", "/x?a=1&b=\"2\"");
        a.children.push(HtmlNode::Text("a < b & c".into()));
        assert_eq!(
            render(&[HtmlNode::Element(a)]),
            "<a href=\"/x?a=1&amp;b=&quot;2&quot;\">a &lt; b &amp; c</a>"
        );
    }

    #[test]
    fn test_escape_round_trip() {
        let input = "<main><div><p>a &amp; b &lt; c</p></div></main>";
        let nodes = parse_html(input);
        let p = find_element(&nodes, "p").unwrap();
        assert_eq!(p.text_content(), "a & b < c");
        let rendered = render(&[HtmlNode::Element(p.clone())]);
        assert_eq!(rendered, "<p>a &amp; b &lt; c</p>");
    }

    #[test]
    fn test_render_envelope_empty() {
        let section = HtmlNode::Element(Element::new("div"));
        assert_eq!(
            render_envelope(&[section]),
            "\n<body>\n  <header></header>\n  <main><div></div></main>\n  <footer></footer>\n</body>\n"
        );
    }

    #[test]
    fn test_blank_text_detection() {
        assert!(HtmlNode::Text("\n  \t".into()).is_blank_text());
        assert!(!HtmlNode::Text(" x ".into()).is_blank_text());
    }
}
