//! The structured-document schema: node and mark definitions plus the
//! rules that map the DOM interchange tree to document nodes and back.
//!
//! The shape mirrors the editor schema: a `doc` of block nodes, text
//! blocks holding marked text runs and inline nodes, tables for authored
//! blocks, and the two region-edit wrappers. Parsing is lenient (unknown
//! wrappers are spliced, stray inline content is wrapped in a paragraph);
//! serialization is strict so output bytes are canonical.

use std::collections::BTreeMap;

use crate::dom::{Element, HtmlNode};

// ─── Node model ───────────────────────────────────────────────────────

/// Block-level node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Paragraph,
    Heading,
    Blockquote,
    CodeBlock,
    HorizontalRule,
    BulletList,
    OrderedList,
    ListItem,
    Table,
    TableRow,
    TableCell,
    LocAdded,
    LocDeleted,
}

impl BlockKind {
    /// Stable node-type name used in the CRDT representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Paragraph => "paragraph",
            BlockKind::Heading => "heading",
            BlockKind::Blockquote => "blockquote",
            BlockKind::CodeBlock => "code_block",
            BlockKind::HorizontalRule => "horizontal_rule",
            BlockKind::BulletList => "bullet_list",
            BlockKind::OrderedList => "ordered_list",
            BlockKind::ListItem => "list_item",
            BlockKind::Table => "table",
            BlockKind::TableRow => "table_row",
            BlockKind::TableCell => "table_cell",
            BlockKind::LocAdded => "loc_added",
            BlockKind::LocDeleted => "loc_deleted",
        }
    }

    pub fn from_str(name: &str) -> Option<Self> {
        Some(match name {
            "paragraph" => BlockKind::Paragraph,
            "heading" => BlockKind::Heading,
            "blockquote" => BlockKind::Blockquote,
            "code_block" => BlockKind::CodeBlock,
            "horizontal_rule" => BlockKind::HorizontalRule,
            "bullet_list" => BlockKind::BulletList,
            "ordered_list" => BlockKind::OrderedList,
            "list_item" => BlockKind::ListItem,
            "table" => BlockKind::Table,
            "table_row" => BlockKind::TableRow,
            "table_cell" => BlockKind::TableCell,
            "loc_added" => BlockKind::LocAdded,
            "loc_deleted" => BlockKind::LocDeleted,
            _ => return None,
        })
    }

    /// True for nodes whose content is inline (text runs and inline nodes).
    pub fn is_textblock(&self) -> bool {
        matches!(
            self,
            BlockKind::Paragraph | BlockKind::Heading | BlockKind::CodeBlock
        )
    }
}

/// Inline leaf node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineKind {
    Image,
    HardBreak,
}

impl InlineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InlineKind::Image => "image",
            InlineKind::HardBreak => "hard_break",
        }
    }

    pub fn from_str(name: &str) -> Option<Self> {
        match name {
            "image" => Some(InlineKind::Image),
            "hard_break" => Some(InlineKind::HardBreak),
            _ => None,
        }
    }
}

/// Text formatting marks.
///
/// The context-highlight mark is editor-internal: it may appear in CRDT
/// state written by clients but never serializes to HTML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mark {
    Link { href: String, title: Option<String> },
    Em,
    Strong,
    Sup,
    Sub,
    Code,
    ContextHighlight,
}

impl Mark {
    pub fn name(&self) -> &'static str {
        match self {
            Mark::Link { .. } => "link",
            Mark::Em => "em",
            Mark::Strong => "strong",
            Mark::Sup => "sup",
            Mark::Sub => "sub",
            Mark::Code => "code",
            Mark::ContextHighlight => "contextHighlightingMark",
        }
    }

    /// Canonical nesting rank: lower ranks wrap higher ones.
    fn rank(&self) -> u8 {
        match self {
            Mark::Link { .. } => 0,
            Mark::Em => 1,
            Mark::Strong => 2,
            Mark::Sup => 3,
            Mark::Sub => 4,
            Mark::Code => 5,
            Mark::ContextHighlight => 6,
        }
    }
}

/// A document node.
#[derive(Debug, Clone, PartialEq)]
pub enum DocNode {
    Block(Block),
    Text(TextSpan),
    Inline(InlineNode),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub kind: BlockKind,
    pub attrs: BTreeMap<String, String>,
    pub children: Vec<DocNode>,
}

impl Block {
    pub fn new(kind: BlockKind) -> Self {
        Self {
            kind,
            attrs: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_children(kind: BlockKind, children: Vec<DocNode>) -> Self {
        Self {
            kind,
            attrs: BTreeMap::new(),
            children,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    pub text: String,
    pub marks: Vec<Mark>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InlineNode {
    pub kind: InlineKind,
    pub attrs: BTreeMap<String, String>,
}

/// Sort marks into canonical nesting order and drop duplicates.
pub fn normalize_marks(marks: &mut Vec<Mark>) {
    marks.sort_by_key(Mark::rank);
    marks.dedup_by(|a, b| a.name() == b.name());
}

// ─── DOM → document ───────────────────────────────────────────────────

/// Parse a block-content DOM sequence into document nodes.
///
/// Stray inline content at block level is gathered into a paragraph,
/// which is also how a bare image between blocks becomes editable.
pub fn from_dom(nodes: &[HtmlNode]) -> Vec<DocNode> {
    let mut out = Vec::new();
    let mut pending_inline: Vec<DocNode> = Vec::new();

    for node in nodes {
        match node {
            HtmlNode::Text(text) => {
                if !node.is_blank_text() {
                    pending_inline.push(DocNode::Text(TextSpan {
                        text: text.clone(),
                        marks: Vec::new(),
                    }));
                }
            }
            HtmlNode::Element(el) => {
                if is_block_tag(&el.tag) {
                    flush_inline(&mut pending_inline, &mut out);
                    out.extend(parse_block(el));
                } else {
                    pending_inline.extend(parse_inline(node, &[]));
                }
            }
        }
    }
    flush_inline(&mut pending_inline, &mut out);
    out
}

fn flush_inline(pending: &mut Vec<DocNode>, out: &mut Vec<DocNode>) {
    if pending.is_empty() {
        return;
    }
    out.push(DocNode::Block(Block::with_children(
        BlockKind::Paragraph,
        std::mem::take(pending),
    )));
}

fn is_block_tag(tag: &str) -> bool {
    matches!(
        tag,
        "p" | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "blockquote"
            | "pre"
            | "hr"
            | "ul"
            | "ol"
            | "table"
            | "div"
            | "da-loc-added"
            | "da-loc-deleted"
    )
}

fn parse_block(el: &Element) -> Vec<DocNode> {
    match el.tag.as_str() {
        "p" => {
            let mut block = Block::new(BlockKind::Paragraph);
            block.children = parse_inline_children(el);
            vec![DocNode::Block(block)]
        }
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let mut block = Block::new(BlockKind::Heading);
            block
                .attrs
                .insert("level".into(), el.tag[1..].to_string());
            block.children = parse_inline_children(el);
            vec![DocNode::Block(block)]
        }
        "blockquote" => vec![DocNode::Block(Block::with_children(
            BlockKind::Blockquote,
            from_dom(&el.children),
        ))],
        "pre" => {
            let text = match el.child_elements().find(|c| c.tag == "code") {
                Some(code) => code.text_content(),
                None => el.text_content(),
            };
            let mut block = Block::new(BlockKind::CodeBlock);
            if !text.is_empty() {
                block.children.push(DocNode::Text(TextSpan {
                    text,
                    marks: Vec::new(),
                }));
            }
            vec![DocNode::Block(block)]
        }
        "hr" => vec![DocNode::Block(Block::new(BlockKind::HorizontalRule))],
        "ul" | "ol" => {
            let kind = if el.tag == "ul" {
                BlockKind::BulletList
            } else {
                BlockKind::OrderedList
            };
            let items = el
                .child_elements()
                .filter(|c| c.tag == "li")
                .map(|li| {
                    DocNode::Block(Block::with_children(
                        BlockKind::ListItem,
                        from_dom(&li.children),
                    ))
                })
                .collect();
            vec![DocNode::Block(Block::with_children(kind, items))]
        }
        "table" => vec![DocNode::Block(parse_table(el))],
        "da-loc-added" => vec![DocNode::Block(Block::with_children(
            BlockKind::LocAdded,
            from_dom(&el.children),
        ))],
        "da-loc-deleted" => vec![DocNode::Block(Block::with_children(
            BlockKind::LocDeleted,
            from_dom(&el.children),
        ))],
        // Stray wrappers are spliced into their parent.
        "div" => from_dom(&el.children),
        _ => from_dom(&el.children),
    }
}

fn parse_table(el: &Element) -> Block {
    let mut rows = Vec::new();
    collect_rows(el, &mut rows);
    Block::with_children(BlockKind::Table, rows)
}

fn collect_rows(el: &Element, rows: &mut Vec<DocNode>) {
    for child in el.child_elements() {
        match child.tag.as_str() {
            "thead" | "tbody" | "tfoot" => collect_rows(child, rows),
            "tr" => {
                let cells = child
                    .child_elements()
                    .filter(|c| c.tag == "td" || c.tag == "th")
                    .map(|cell| {
                        let mut block =
                            Block::with_children(BlockKind::TableCell, from_dom(&cell.children));
                        if let Some(colspan) = cell.attr("colspan") {
                            block.attrs.insert("colspan".into(), colspan.to_string());
                        }
                        DocNode::Block(block)
                    })
                    .collect();
                rows.push(DocNode::Block(Block::with_children(
                    BlockKind::TableRow,
                    cells,
                )));
            }
            _ => {}
        }
    }
}

fn parse_inline_children(el: &Element) -> Vec<DocNode> {
    let mut out = Vec::new();
    for child in &el.children {
        out.extend(parse_inline(child, &[]));
    }
    out
}

fn parse_inline(node: &HtmlNode, active: &[Mark]) -> Vec<DocNode> {
    match node {
        HtmlNode::Text(text) => vec![DocNode::Text(TextSpan {
            text: text.clone(),
            marks: active.to_vec(),
        })],
        HtmlNode::Element(el) => match el.tag.as_str() {
            "img" => vec![DocNode::Inline(parse_image(el))],
            "picture" => match el.child_elements().find(|c| c.tag == "img") {
                Some(img) => vec![DocNode::Inline(parse_image(img))],
                None => Vec::new(),
            },
            "br" => vec![DocNode::Inline(InlineNode {
                kind: InlineKind::HardBreak,
                attrs: BTreeMap::new(),
            })],
            "a" => {
                let mark = Mark::Link {
                    href: el.attr("href").unwrap_or_default().to_string(),
                    title: el.attr("title").map(str::to_string),
                };
                parse_inline_marked(el, active, mark)
            }
            "em" | "i" => parse_inline_marked(el, active, Mark::Em),
            "strong" | "b" => parse_inline_marked(el, active, Mark::Strong),
            "sup" => parse_inline_marked(el, active, Mark::Sup),
            "sub" => parse_inline_marked(el, active, Mark::Sub),
            "code" => parse_inline_marked(el, active, Mark::Code),
            _ => {
                // Unknown inline wrappers contribute their content only.
                let mut out = Vec::new();
                for child in &el.children {
                    out.extend(parse_inline(child, active));
                }
                out
            }
        },
    }
}

fn parse_inline_marked(el: &Element, active: &[Mark], mark: Mark) -> Vec<DocNode> {
    let mut marks = active.to_vec();
    marks.push(mark);
    normalize_marks(&mut marks);
    let mut out = Vec::new();
    for child in &el.children {
        out.extend(parse_inline(child, &marks));
    }
    out
}

fn parse_image(el: &Element) -> InlineNode {
    let mut attrs = BTreeMap::new();
    for key in ["src", "alt", "title", "href", "loading"] {
        if let Some(value) = el.attr(key) {
            attrs.insert(key.to_string(), value.to_string());
        }
    }
    InlineNode {
        kind: InlineKind::Image,
        attrs,
    }
}

// ─── Document → DOM ───────────────────────────────────────────────────

/// Serialize document nodes to the DOM interchange tree.
///
/// Empty paragraphs are dropped here, which keeps the padding inserted
/// around authored blocks and section breaks out of the output.
pub fn to_dom(nodes: &[DocNode]) -> Vec<HtmlNode> {
    let mut out = Vec::new();
    for node in nodes {
        match node {
            DocNode::Block(block) => {
                if let Some(rendered) = block_to_dom(block) {
                    out.push(rendered);
                }
            }
            // Inline content at top level is not valid document shape;
            // wrap defensively so nothing is silently lost.
            DocNode::Text(_) | DocNode::Inline(_) => {
                out.extend(inline_to_dom(std::slice::from_ref(node)));
            }
        }
    }
    out
}

fn block_to_dom(block: &Block) -> Option<HtmlNode> {
    match block.kind {
        BlockKind::Paragraph => {
            if block.children.is_empty() {
                return None;
            }
            // A paragraph holding a single image prints the image alone.
            if let [DocNode::Inline(inline)] = block.children.as_slice() {
                if inline.kind == InlineKind::Image {
                    return Some(image_to_dom(inline));
                }
            }
            Some(HtmlNode::Element(Element::with_children(
                "p",
                inline_to_dom(&block.children),
            )))
        }
        BlockKind::Heading => {
            let level = block.attrs.get("level").map(String::as_str).unwrap_or("1");
            let tag = match level {
                "1" | "2" | "3" | "4" | "5" | "6" => format!("h{level}"),
                _ => "h1".to_string(),
            };
            Some(HtmlNode::Element(Element::with_children(
                tag,
                inline_to_dom(&block.children),
            )))
        }
        BlockKind::Blockquote => Some(HtmlNode::Element(Element::with_children(
            "blockquote",
            to_dom(&block.children),
        ))),
        BlockKind::CodeBlock => {
            let mut text = String::new();
            for child in &block.children {
                if let DocNode::Text(span) = child {
                    text.push_str(&span.text);
                }
            }
            let code = Element::with_children("code", vec![HtmlNode::Text(text)]);
            Some(HtmlNode::Element(Element::with_children(
                "pre",
                vec![HtmlNode::Element(code)],
            )))
        }
        BlockKind::HorizontalRule => Some(HtmlNode::Element(Element::new("hr"))),
        BlockKind::BulletList | BlockKind::OrderedList => {
            let tag = if block.kind == BlockKind::BulletList {
                "ul"
            } else {
                "ol"
            };
            let items = block
                .children
                .iter()
                .filter_map(|child| match child {
                    DocNode::Block(item) if item.kind == BlockKind::ListItem => {
                        Some(HtmlNode::Element(list_item_to_dom(item)))
                    }
                    _ => None,
                })
                .collect();
            Some(HtmlNode::Element(Element::with_children(tag, items)))
        }
        BlockKind::ListItem => Some(HtmlNode::Element(list_item_to_dom(block))),
        BlockKind::Table => {
            let rows = block
                .children
                .iter()
                .filter_map(|child| match child {
                    DocNode::Block(row) if row.kind == BlockKind::TableRow => {
                        block_to_dom(row)
                    }
                    _ => None,
                })
                .collect();
            Some(HtmlNode::Element(Element::with_children("table", rows)))
        }
        BlockKind::TableRow => {
            let cells = block
                .children
                .iter()
                .filter_map(|child| match child {
                    DocNode::Block(cell) if cell.kind == BlockKind::TableCell => {
                        block_to_dom(cell)
                    }
                    _ => None,
                })
                .collect();
            Some(HtmlNode::Element(Element::with_children("tr", cells)))
        }
        BlockKind::TableCell => {
            let mut cell = Element::with_children("td", to_dom(&block.children));
            if let Some(colspan) = block.attrs.get("colspan") {
                cell.set_attr("colspan", colspan.clone());
            }
            Some(HtmlNode::Element(cell))
        }
        BlockKind::LocAdded => Some(HtmlNode::Element(Element::with_children(
            "da-loc-added",
            to_dom(&block.children),
        ))),
        BlockKind::LocDeleted => Some(HtmlNode::Element(Element::with_children(
            "da-loc-deleted",
            to_dom(&block.children),
        ))),
    }
}

/// A list item whose sole child is a paragraph prints its inline content.
fn list_item_to_dom(item: &Block) -> Element {
    if let [DocNode::Block(only)] = item.children.as_slice() {
        if only.kind == BlockKind::Paragraph {
            return Element::with_children("li", inline_to_dom(&only.children));
        }
    }
    Element::with_children("li", to_dom(&item.children))
}

/// Render inline content, grouping adjacent runs that share marks so the
/// emitted tags nest minimally and deterministically.
pub fn inline_to_dom(children: &[DocNode]) -> Vec<HtmlNode> {
    let mut out = Vec::new();
    let mut spans: Vec<TextSpan> = Vec::new();

    for child in children {
        match child {
            DocNode::Text(span) => {
                if !span.text.is_empty() {
                    spans.push(span.clone());
                }
            }
            DocNode::Inline(inline) => {
                out.extend(render_spans(&spans));
                spans.clear();
                match inline.kind {
                    InlineKind::Image => out.push(image_to_dom(inline)),
                    InlineKind::HardBreak => {
                        out.push(HtmlNode::Element(Element::new("br")));
                    }
                }
            }
            DocNode::Block(_) => {}
        }
    }
    out.extend(render_spans(&spans));
    out
}

fn render_spans(spans: &[TextSpan]) -> Vec<HtmlNode> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < spans.len() {
        let marks = visible_marks(&spans[i]);
        match marks.first() {
            None => {
                out.push(HtmlNode::Text(spans[i].text.clone()));
                i += 1;
            }
            Some(outer) => {
                // Extend the run while the outermost mark stays active.
                let mut j = i;
                while j < spans.len() && visible_marks(&spans[j]).first() == Some(outer) {
                    j += 1;
                }
                let inner: Vec<TextSpan> = spans[i..j]
                    .iter()
                    .map(|span| TextSpan {
                        text: span.text.clone(),
                        marks: span
                            .marks
                            .iter()
                            .filter(|m| *m != outer)
                            .cloned()
                            .collect(),
                    })
                    .collect();
                let mut el = mark_element(outer);
                el.children = render_spans(&inner);
                out.push(HtmlNode::Element(el));
                i = j;
            }
        }
    }
    out
}

fn visible_marks(span: &TextSpan) -> Vec<Mark> {
    let mut marks: Vec<Mark> = span
        .marks
        .iter()
        .filter(|m| !matches!(m, Mark::ContextHighlight))
        .cloned()
        .collect();
    normalize_marks(&mut marks);
    marks
}

fn mark_element(mark: &Mark) -> Element {
    match mark {
        Mark::Link { href, title } => {
            let mut a = Element::new("a");
            a.set_attr("href", href.clone());
            if let Some(title) = title {
                a.set_attr("title", title.clone());
            }
            a
        }
        Mark::Em => Element::new("em"),
        Mark::Strong => Element::new("strong"),
        Mark::Sup => Element::new("sup"),
        Mark::Sub => Element::new("sub"),
        Mark::Code => Element::new("code"),
        Mark::ContextHighlight => Element::new("span"),
    }
}

/// Expand an image node to the responsive picture form, wrapping it in an
/// anchor when the image carries a link target.
fn image_to_dom(image: &InlineNode) -> HtmlNode {
    let src = image
        .attrs
        .get("src")
        .cloned()
        .unwrap_or_default();

    let mut first_source = Element::new("source");
    first_source.set_attr("srcset", src.clone());
    let mut second_source = Element::new("source");
    second_source.set_attr("srcset", src.clone());
    second_source.set_attr("media", "(min-width: 600px)");

    let mut img = Element::new("img");
    img.set_attr("src", src);
    if let Some(alt) = image.attrs.get("alt") {
        img.set_attr("alt", alt.clone());
    }
    if let Some(title) = image.attrs.get("title") {
        img.set_attr("title", title.clone());
    }
    let loading = image
        .attrs
        .get("loading")
        .cloned()
        .unwrap_or_else(|| "lazy".to_string());
    img.set_attr("loading", loading);

    let picture = Element::with_children(
        "picture",
        vec![
            HtmlNode::Element(first_source),
            HtmlNode::Element(second_source),
            HtmlNode::Element(img),
        ],
    );

    match image.attrs.get("href") {
        Some(href) => {
            let mut a = Element::new("a");
            a.set_attr("href", href.clone());
            if let Some(title) = image.attrs.get("title") {
                a.set_attr("title", title.clone());
            }
            a.children.push(HtmlNode::Element(picture));
            HtmlNode::Element(a)
        }
        None => HtmlNode::Element(picture),
    }
}
