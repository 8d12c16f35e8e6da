//! # quill-codec — HTML ↔ structured-document bijection
//!
//! Converts between the authored HTML form served by the content store
//! and the Yrs-backed structured document edited collaboratively.
//!
//! ```text
//!  HTML text ──parse──► DOM tree ──transforms──► schema parse ──► DocNode
//!                                                                   │
//!  "prosemirror" XML fragment ◄──────────── write_fragment ◄────────┘
//!
//!  "prosemirror" XML fragment ──read_fragment──► DocNode
//!        │
//!        └──► schema serialize ──► de-table + sections ──► HTML text
//! ```
//!
//! The round-trip contract: any HTML already in the canonical envelope
//! produced here survives `doc2aem(aem2doc(html))` byte for byte, and
//! arbitrary input stabilizes after one pass.

pub mod dom;
pub mod schema;
pub mod transform;
pub mod ydoc;

use yrs::{Doc, Transact};

pub use schema::{Block, BlockKind, DocNode, InlineKind, InlineNode, Mark, TextSpan};
pub use ydoc::{read_fragment, write_fragment, ROOT_FRAGMENT};

/// Codec failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The input HTML has no `<main>` element to read content from.
    MissingMain,
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::MissingMain => write!(f, "input HTML has no <main> element"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Parse authored HTML into document nodes.
pub fn parse_aem(html: &str) -> Result<Vec<DocNode>, CodecError> {
    let nodes = dom::parse_html(html);
    let main = dom::find_element(&nodes, "main").ok_or(CodecError::MissingMain)?;
    let spliced = transform::splice_sections(main);
    Ok(schema::from_dom(&spliced))
}

/// Render document nodes to the canonical HTML envelope.
pub fn render_aem(nodes: &[DocNode]) -> String {
    let rendered = schema::to_dom(nodes);
    let restored = transform::detable(rendered);
    let sections = transform::split_sections(restored);
    dom::render_envelope(&sections)
}

/// Parse authored HTML and append it to the document's root fragment.
///
/// The fragment is not cleared; callers replacing existing content clear
/// it in their own transaction so the rewrite is one update.
pub fn aem2doc(html: &str, doc: &Doc) -> Result<(), CodecError> {
    let nodes = parse_aem(html)?;
    let root = doc.get_or_insert_xml_fragment(ROOT_FRAGMENT);
    let mut txn = doc.transact_mut();
    ydoc::write_fragment(&mut txn, &root, &nodes);
    Ok(())
}

/// Project the document's root fragment to the canonical HTML envelope.
pub fn doc2aem(doc: &Doc) -> String {
    let root = doc.get_or_insert_xml_fragment(ROOT_FRAGMENT);
    let txn = doc.transact();
    let nodes = ydoc::read_fragment(&txn, &root);
    render_aem(&nodes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(html: &str) -> String {
        let doc = Doc::new();
        aem2doc(html, &doc).unwrap();
        doc2aem(&doc)
    }

    #[test]
    fn test_missing_main_is_an_error() {
        assert_eq!(parse_aem("<p>nothing</p>"), Err(CodecError::MissingMain));
    }

    #[test]
    fn test_empty_store_document() {
        // The canonical empty body returned by the store on 404.
        let out = round_trip("<main></main>");
        assert_eq!(
            out,
            "\n<body>\n  <header></header>\n  <main><div></div></main>\n  <footer></footer>\n</body>\n"
        );
    }

    #[test]
    fn test_paragraph_survives() {
        let out = round_trip("<main><div><p>hello</p></div></main>");
        assert!(out.contains("<main><div><p>hello</p></div></main>"));
    }

    #[test]
    fn test_canonical_output_is_fixed_point() {
        let once = round_trip("<main><div><h1>Title</h1><p>Body <strong>text</strong></p></div></main>");
        let twice = round_trip(&once);
        assert_eq!(once, twice);
    }
}
