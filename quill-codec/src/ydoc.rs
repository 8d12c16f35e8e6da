//! Bridge between the document node tree and the Yrs XML fragment that
//! backs collaborative editing.
//!
//! The representation follows the y-prosemirror convention: every node
//! is an `XmlElement` named after its type with stringified attributes,
//! and runs of text live in `XmlText` nodes whose formatting attributes
//! carry the marks (mark name mapped to an attribute object).

use std::collections::HashMap;
use std::sync::Arc;

use yrs::types::text::YChange;
use yrs::types::{Attrs, Value};
use yrs::{
    Any, ReadTxn, Text, TransactionMut, Xml, XmlElementPrelim, XmlElementRef, XmlFragment,
    XmlFragmentRef, XmlNode, XmlTextPrelim, XmlTextRef,
};

use crate::schema::{
    normalize_marks, Block, BlockKind, DocNode, InlineKind, InlineNode, Mark, TextSpan,
};

/// Name of the XML fragment root holding the document.
pub const ROOT_FRAGMENT: &str = "prosemirror";

// ─── Writing ──────────────────────────────────────────────────────────

/// Append document nodes to the end of the fragment.
///
/// Callers owning a reset clear the fragment first inside the same
/// transaction so observers see a single update.
pub fn write_fragment(txn: &mut TransactionMut<'_>, root: &XmlFragmentRef, nodes: &[DocNode]) {
    write_children(txn, root, nodes);
}

fn write_children<P: XmlFragment>(txn: &mut TransactionMut<'_>, parent: &P, nodes: &[DocNode]) {
    let mut i = 0;
    while i < nodes.len() {
        match &nodes[i] {
            DocNode::Block(block) => {
                let el = push_element(txn, parent, block.kind.as_str());
                for (key, value) in &block.attrs {
                    el.insert_attribute(txn, key.clone(), value.clone());
                }
                write_children(txn, &el, &block.children);
                i += 1;
            }
            DocNode::Inline(inline) => {
                let el = push_element(txn, parent, inline.kind.as_str());
                for (key, value) in &inline.attrs {
                    el.insert_attribute(txn, key.clone(), value.clone());
                }
                i += 1;
            }
            DocNode::Text(_) => {
                // Consume the contiguous run of text spans into one node.
                let start = i;
                while i < nodes.len() && matches!(nodes[i], DocNode::Text(_)) {
                    i += 1;
                }
                let index = parent.len(txn);
                let text: XmlTextRef = parent.insert(txn, index, XmlTextPrelim::new(""));
                for node in &nodes[start..i] {
                    let DocNode::Text(span) = node else { continue };
                    let at = text.len(txn);
                    if span.marks.is_empty() {
                        text.insert(txn, at, &span.text);
                    } else {
                        text.insert_with_attributes(txn, at, &span.text, marks_to_attrs(&span.marks));
                    }
                }
            }
        }
    }
}

fn push_element<P: XmlFragment>(
    txn: &mut TransactionMut<'_>,
    parent: &P,
    tag: &str,
) -> XmlElementRef {
    let index = parent.len(txn);
    parent.insert(txn, index, XmlElementPrelim::empty(tag.to_string()))
}

fn marks_to_attrs(marks: &[Mark]) -> Attrs {
    let mut attrs = Attrs::new();
    for mark in marks {
        let value = match mark {
            Mark::Link { href, title } => {
                let mut map = HashMap::new();
                map.insert("href".to_string(), Any::from(href.as_str()));
                if let Some(title) = title {
                    map.insert("title".to_string(), Any::from(title.as_str()));
                }
                Any::Map(Arc::new(map))
            }
            _ => Any::Map(Arc::new(HashMap::new())),
        };
        attrs.insert(Arc::from(mark.name()), value);
    }
    attrs
}

// ─── Reading ──────────────────────────────────────────────────────────

/// Read the full document node tree out of the fragment.
pub fn read_fragment<T: ReadTxn>(txn: &T, root: &XmlFragmentRef) -> Vec<DocNode> {
    read_children(txn, root)
}

fn read_children<T: ReadTxn, P: XmlFragment>(txn: &T, parent: &P) -> Vec<DocNode> {
    let mut out = Vec::new();
    for i in 0..parent.len(txn) {
        match parent.get(txn, i) {
            Some(XmlNode::Element(el)) => {
                if let Some(node) = read_element(txn, &el) {
                    out.push(node);
                }
            }
            Some(XmlNode::Text(text)) => read_text(txn, &text, &mut out),
            _ => {}
        }
    }
    out
}

fn read_element<T: ReadTxn>(txn: &T, el: &XmlElementRef) -> Option<DocNode> {
    let tag = el.tag().to_string();
    let mut attrs = std::collections::BTreeMap::new();
    for (key, value) in el.attributes(txn) {
        attrs.insert(key.to_string(), value);
    }

    if let Some(kind) = BlockKind::from_str(&tag) {
        let children = read_children(txn, el);
        return Some(DocNode::Block(Block {
            kind,
            attrs,
            children,
        }));
    }
    if let Some(kind) = InlineKind::from_str(&tag) {
        return Some(DocNode::Inline(InlineNode { kind, attrs }));
    }
    log::warn!("ignoring unknown node type {tag:?} in document state");
    None
}

fn read_text<T: ReadTxn>(txn: &T, text: &XmlTextRef, out: &mut Vec<DocNode>) {
    for chunk in text.diff(txn, YChange::identity) {
        let Value::Any(Any::String(content)) = chunk.insert else {
            continue;
        };
        if content.is_empty() {
            continue;
        }
        let mut marks = Vec::new();
        if let Some(attrs) = chunk.attributes {
            for (name, value) in attrs.iter() {
                if let Some(mark) = mark_from_attr(name, value) {
                    marks.push(mark);
                }
            }
        }
        normalize_marks(&mut marks);
        out.push(DocNode::Text(TextSpan {
            text: content.to_string(),
            marks,
        }));
    }
}

fn mark_from_attr(name: &str, value: &Any) -> Option<Mark> {
    match name {
        "link" => {
            let mut href = String::new();
            let mut title = None;
            if let Any::Map(map) = value {
                if let Some(Any::String(h)) = map.get("href") {
                    href = h.to_string();
                }
                if let Some(Any::String(t)) = map.get("title") {
                    title = Some(t.to_string());
                }
            }
            Some(Mark::Link { href, title })
        }
        "em" => Some(Mark::Em),
        "strong" => Some(Mark::Strong),
        "sup" => Some(Mark::Sup),
        "sub" => Some(Mark::Sub),
        "code" => Some(Mark::Code),
        "contextHighlightingMark" => Some(Mark::ContextHighlight),
        _ => None,
    }
}
