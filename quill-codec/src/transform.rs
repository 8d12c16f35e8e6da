//! Structural transforms between the authored HTML shape and the shape
//! the document schema understands.
//!
//! Inbound: classed `<div>` blocks become named tables, anchor-wrapped
//! images collapse onto the image, `---` paragraphs become rules, and
//! section divs are spliced into one flat block sequence separated by
//! padded rules.
//!
//! Outbound: tables become classed divs again and the flat sequence is
//! split back into section divs at each rule.

use crate::dom::{Element, HtmlNode};

// ─── Inbound (HTML → document shape) ──────────────────────────────────

/// Flatten `<main>` section divs into a single block sequence.
///
/// Sections are separated by `<p></p><hr><p></p>` padding; the empty
/// paragraphs vanish again on output and keep the rule easy to edit
/// around inside the editor.
pub fn splice_sections(main: &Element) -> Vec<HtmlNode> {
    let mut out = Vec::new();
    let mut first = true;
    for child in &main.children {
        let HtmlNode::Element(section) = child else {
            continue;
        };
        if section.tag != "div" {
            log::debug!("skipping non-div main child <{}>", section.tag);
            continue;
        }
        if !first {
            out.push(HtmlNode::Element(Element::new("p")));
            out.push(HtmlNode::Element(Element::new("hr")));
            out.push(HtmlNode::Element(Element::new("p")));
        }
        first = false;

        let mut children = rewrite_blocks(&section.children);
        collapse_anchored_images(&mut children);
        dashes_to_rules(&mut children);
        out.extend(children);
    }
    out
}

/// Replace classed divs with named tables, recursing into region-edit
/// wrappers so blocks inside them are rewritten too.
fn rewrite_blocks(nodes: &[HtmlNode]) -> Vec<HtmlNode> {
    let mut out = Vec::new();
    for node in nodes {
        match node {
            HtmlNode::Element(el) if el.tag == "div" && has_class(el) => {
                out.extend(block_to_table(el));
            }
            HtmlNode::Element(el)
                if el.tag == "da-loc-added" || el.tag == "da-loc-deleted" =>
            {
                let mut wrapper = Element::new(el.tag.clone());
                wrapper.children = rewrite_blocks(&el.children);
                out.push(HtmlNode::Element(wrapper));
            }
            other => out.push(other.clone()),
        }
    }
    out
}

fn has_class(el: &Element) -> bool {
    el.attr("class").is_some_and(|c| !c.trim().is_empty())
}

/// Rewrite one authored block into its table form.
///
/// The header row names the block (`first-class (other, classes)`) in a
/// single cell spanning the widest row; each child div becomes a row and
/// each grand-child div a cell. The table is padded with empty
/// paragraphs so the cursor can be placed around it.
fn block_to_table(block: &Element) -> Vec<HtmlNode> {
    let rows: Vec<&Element> = block
        .child_elements()
        .filter(|c| c.tag == "div")
        .collect();

    let max_cols = rows
        .iter()
        .map(|row| {
            let cells = row.child_elements().filter(|c| c.tag == "div").count();
            cells.max(1)
        })
        .max()
        .unwrap_or(1);

    let mut header_cell = Element::new("td");
    header_cell.set_attr("colspan", max_cols.to_string());
    header_cell
        .children
        .push(HtmlNode::Text(block_name(block.attr("class").unwrap_or(""))));
    let header_row = Element::with_children("tr", vec![HtmlNode::Element(header_cell)]);

    let mut table = Element::new("table");
    table.children.push(HtmlNode::Element(header_row));

    for row in rows {
        let cell_divs: Vec<&Element> = row
            .child_elements()
            .filter(|c| c.tag == "div")
            .collect();
        let mut tr = Element::new("tr");
        if cell_divs.is_empty() {
            // A row without cell divs is itself a single cell.
            tr.children.push(HtmlNode::Element(Element::with_children(
                "td",
                row.children.clone(),
            )));
        } else {
            for cell in cell_divs {
                tr.children.push(HtmlNode::Element(Element::with_children(
                    "td",
                    cell.children.clone(),
                )));
            }
        }
        table.children.push(HtmlNode::Element(tr));
    }

    vec![
        HtmlNode::Element(Element::new("p")),
        HtmlNode::Element(table),
        HtmlNode::Element(Element::new("p")),
    ]
}

/// Render a class list as the display name: `columns dark wide` reads as
/// `columns (dark, wide)`.
fn block_name(class: &str) -> String {
    let mut tokens = class.split_whitespace();
    let first = tokens.next().unwrap_or_default().to_string();
    let rest: Vec<&str> = tokens.collect();
    if rest.is_empty() {
        first
    } else {
        format!("{} ({})", first, rest.join(", "))
    }
}

/// Collapse `<a>` elements wrapping exactly one image onto the image
/// itself. The editor cannot represent anchor-wrapped images, so the
/// link target travels as image attributes instead.
fn collapse_anchored_images(nodes: &mut Vec<HtmlNode>) {
    for node in nodes.iter_mut() {
        let HtmlNode::Element(el) = node else { continue };
        collapse_anchored_images(&mut el.children);

        if el.tag != "a" {
            continue;
        }
        let significant: Vec<&HtmlNode> = el
            .children
            .iter()
            .filter(|c| !c.is_blank_text())
            .collect();
        let [only] = significant.as_slice() else {
            continue;
        };
        let Some(inner) = only.as_element() else {
            continue;
        };
        let img = match inner.tag.as_str() {
            "img" => Some(inner.clone()),
            "picture" => inner
                .child_elements()
                .find(|c| c.tag == "img")
                .cloned(),
            _ => None,
        };
        let Some(mut img) = img else { continue };

        if let Some(href) = el.attr("href") {
            set_or_replace(&mut img, "href", href.to_string());
        }
        if let Some(title) = el.attr("title") {
            set_or_replace(&mut img, "title", title.to_string());
        }
        *node = HtmlNode::Element(img);
    }
}

fn set_or_replace(el: &mut Element, name: &str, value: String) {
    if let Some(entry) = el.attrs.iter_mut().find(|(k, _)| k == name) {
        entry.1 = value;
    } else {
        el.attrs.push((name.to_string(), value));
    }
}

/// Turn paragraphs containing exactly the text `---` into rules.
fn dashes_to_rules(nodes: &mut Vec<HtmlNode>) {
    for node in nodes.iter_mut() {
        let HtmlNode::Element(el) = node else { continue };
        dashes_to_rules(&mut el.children);
        if el.tag == "p" {
            if let [HtmlNode::Text(text)] = el.children.as_slice() {
                if text.trim() == "---" {
                    *node = HtmlNode::Element(Element::new("hr"));
                }
            }
        }
    }
}

// ─── Outbound (document shape → HTML) ─────────────────────────────────

/// Replace tables with their authored div-block form, recursing through
/// wrappers and nested cells.
pub fn detable(nodes: Vec<HtmlNode>) -> Vec<HtmlNode> {
    nodes
        .into_iter()
        .map(|node| match node {
            HtmlNode::Element(el) if el.tag == "table" => table_to_block(el),
            HtmlNode::Element(mut el) => {
                el.children = detable(el.children);
                HtmlNode::Element(el)
            }
            text => text,
        })
        .collect()
}

fn table_to_block(table: Element) -> HtmlNode {
    let rows: Vec<Element> = table
        .children
        .into_iter()
        .filter_map(|node| match node {
            HtmlNode::Element(el) if el.tag == "tr" => Some(el),
            _ => None,
        })
        .collect();

    let mut block = Element::new("div");
    let name = rows
        .first()
        .map(|header| header.text_content())
        .unwrap_or_default();
    block.set_attr("class", class_from_name(&name));

    for row in rows.into_iter().skip(1) {
        let mut row_div = Element::new("div");
        for cell in row.children {
            let HtmlNode::Element(cell) = cell else { continue };
            if cell.tag != "td" && cell.tag != "th" {
                continue;
            }
            row_div.children.push(HtmlNode::Element(Element::with_children(
                "div",
                detable(cell.children),
            )));
        }
        block.children.push(HtmlNode::Element(row_div));
    }

    HtmlNode::Element(block)
}

/// Derive the class list from a block display name: each token lowercases
/// with non-alphanumeric runs collapsed to dashes.
fn class_from_name(name: &str) -> String {
    let name = name.trim();
    let (first, options) = match name.split_once('(') {
        Some((first, rest)) => (first, rest.trim_end_matches(')')),
        None => (name, ""),
    };
    let mut classes = vec![slug(first)];
    for option in options.split(',') {
        let s = slug(option);
        if !s.is_empty() {
            classes.push(s);
        }
    }
    classes.retain(|c| !c.is_empty());
    classes.join(" ")
}

fn slug(token: &str) -> String {
    let mut out = String::new();
    let mut pending_dash = false;
    for c in token.trim().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

/// Split the flat block sequence into section divs at each rule.
pub fn split_sections(nodes: Vec<HtmlNode>) -> Vec<HtmlNode> {
    let mut sections = Vec::new();
    let mut current = Element::new("div");
    for node in nodes {
        match node {
            HtmlNode::Element(el) if el.tag == "hr" => {
                sections.push(HtmlNode::Element(std::mem::replace(
                    &mut current,
                    Element::new("div"),
                )));
            }
            other => current.children.push(other),
        }
    }
    sections.push(HtmlNode::Element(current));
    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{self, HtmlNode};

    fn main_of(html: &str) -> Element {
        let nodes = dom::parse_html(html);
        dom::find_element(&nodes, "main").unwrap().clone()
    }

    #[test]
    fn test_block_becomes_named_table() {
        let main = main_of(
            "<main><div><div class=\"columns\"><div><div><p>A</p></div><div><p>B</p></div></div></div></div></main>",
        );
        let spliced = splice_sections(&main);
        let table = dom::find_element(&spliced, "table").unwrap();
        // Header row plus one body row.
        assert_eq!(table.child_elements().count(), 2);
        let header = table.child_elements().next().unwrap();
        assert_eq!(header.text_content(), "columns");
        let header_cell = header.child_elements().next().unwrap();
        assert_eq!(header_cell.attr("colspan"), Some("2"));
    }

    #[test]
    fn test_block_name_with_options() {
        assert_eq!(block_name("columns dark wide"), "columns (dark, wide)");
        assert_eq!(block_name("hero"), "hero");
    }

    #[test]
    fn test_class_from_name_round_trip() {
        assert_eq!(class_from_name("columns (dark, wide)"), "columns dark wide");
        assert_eq!(class_from_name("Hero Banner"), "hero-banner");
        assert_eq!(class_from_name("columns"), "columns");
        assert_eq!(class_from_name(&block_name("media gallery")), "media gallery");
    }

    #[test]
    fn test_table_padded_with_empty_paragraphs() {
        let main = main_of("<main><div><div class=\"hero\"><div><p>x</p></div></div></div></main>");
        let spliced = splice_sections(&main);
        assert!(matches!(&spliced[0], HtmlNode::Element(el) if el.tag == "p" && el.children.is_empty()));
        assert!(matches!(&spliced[1], HtmlNode::Element(el) if el.tag == "table"));
        assert!(matches!(&spliced[2], HtmlNode::Element(el) if el.tag == "p" && el.children.is_empty()));
    }

    #[test]
    fn test_sections_joined_with_padded_rule() {
        let main = main_of("<main><div><p>one</p></div><div><p>two</p></div></main>");
        let spliced = splice_sections(&main);
        let tags: Vec<&str> = spliced
            .iter()
            .filter_map(HtmlNode::as_element)
            .map(|el| el.tag.as_str())
            .collect();
        assert_eq!(tags, ["p", "p", "hr", "p", "p"]);
    }

    #[test]
    fn test_anchor_wrapped_image_collapses() {
        let main = main_of("<main><div><a href=\"/x\"><img src=\"/y.png\" alt=\"z\"></a></div></main>");
        let spliced = splice_sections(&main);
        let img = dom::find_element(&spliced, "img").unwrap();
        assert_eq!(img.attr("href"), Some("/x"));
        assert_eq!(img.attr("src"), Some("/y.png"));
        assert!(dom::find_element(&spliced, "a").is_none());
    }

    #[test]
    fn test_anchor_with_text_untouched() {
        let main = main_of("<main><div><p><a href=\"/x\">link</a></p></div></main>");
        let spliced = splice_sections(&main);
        assert!(dom::find_element(&spliced, "a").is_some());
    }

    #[test]
    fn test_dashes_become_rule() {
        let main = main_of("<main><div><p>---</p><p>keep</p></div></main>");
        let spliced = splice_sections(&main);
        assert!(dom::find_element(&spliced, "hr").is_some());
        let remaining: Vec<String> = spliced
            .iter()
            .filter_map(HtmlNode::as_element)
            .filter(|el| el.tag == "p")
            .map(|el| el.text_content())
            .collect();
        assert_eq!(remaining, ["keep"]);
    }

    #[test]
    fn test_blocks_rewritten_inside_wrappers() {
        let main = main_of(
            "<main><div><da-loc-added><div class=\"hero\"><div><p>x</p></div></div></da-loc-added></div></main>",
        );
        let spliced = splice_sections(&main);
        let wrapper = dom::find_element(&spliced, "da-loc-added").unwrap();
        assert!(dom::find_element(&wrapper.children, "table").is_some());
    }

    #[test]
    fn test_detable_restores_block() {
        let main = main_of(
            "<main><div><div class=\"columns dark\"><div><div><p>A</p></div><div><p>B</p></div></div></div></div></main>",
        );
        let spliced = splice_sections(&main);
        let restored = detable(spliced);
        let block = dom::find_element(&restored, "div").unwrap();
        assert_eq!(block.attr("class"), Some("columns dark"));
        let row = block.child_elements().next().unwrap();
        assert_eq!(row.child_elements().count(), 2);
    }

    #[test]
    fn test_split_sections_at_rules() {
        let nodes = vec![
            HtmlNode::Element(Element::with_children(
                "p",
                vec![HtmlNode::Text("one".into())],
            )),
            HtmlNode::Element(Element::new("hr")),
            HtmlNode::Element(Element::with_children(
                "p",
                vec![HtmlNode::Text("two".into())],
            )),
        ];
        let sections = split_sections(nodes);
        assert_eq!(sections.len(), 2);
        assert_eq!(
            dom::render(&sections),
            "<div><p>one</p></div><div><p>two</p></div>"
        );
    }

    #[test]
    fn test_split_sections_empty_input() {
        let sections = split_sections(Vec::new());
        assert_eq!(dom::render(&sections), "<div></div>");
    }
}
