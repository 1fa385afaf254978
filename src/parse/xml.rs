//! XML record extraction.
//!
//! The document is read into a small element tree with `quick-xml`, then
//! the repeated record element is located and each occurrence flattened
//! into a [`RawRecord`].

use std::borrow::Cow;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::warn;

use super::{ParseError, RawRecord};

/// Element names that usually mark one record, in priority order.
pub const CANDIDATE_TAGS: [&str; 6] = ["patent", "application", "document", "record", "item", "entry"];

#[derive(Debug, Default)]
struct Element {
    tag: String,
    attrs: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
}

pub fn parse(text: &str) -> Result<Vec<RawRecord>, ParseError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    if !text.trim_start().starts_with('<') {
        return Err(ParseError::Xml("content does not start with '<'".into()));
    }

    let root = match build_tree(text) {
        Ok(root) => root,
        Err(first) => {
            warn!(error = %first, "XML parse failed, retrying without control characters");
            let cleaned = strip_control_chars(text);
            build_tree(&cleaned).map_err(ParseError::Xml)?
        }
    };

    Ok(select_records(&root)
        .into_iter()
        .map(flatten)
        .filter(|r| !r.is_empty())
        .collect())
}

fn is_forbidden_control(c: char) -> bool {
    c.is_control() && !matches!(c, '\t' | '\n' | '\r') && (c as u32) < 0x20
}

fn strip_control_chars(text: &str) -> String {
    text.chars().filter(|c| !is_forbidden_control(*c)).collect()
}

fn local_name(qualified: &[u8]) -> String {
    let name = match qualified.iter().rposition(|b| *b == b':') {
        Some(i) => &qualified[i + 1..],
        None => qualified,
    };
    String::from_utf8_lossy(name).into_owned()
}

fn open_element(start: &BytesStart<'_>) -> Result<Element, String> {
    let mut element = Element {
        tag: local_name(start.name().as_ref()),
        ..Default::default()
    };
    for attr in start.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = attr.key.as_ref();
        if key == b"xmlns" || key.starts_with(b"xmlns:") {
            continue;
        }
        let value = attr.unescape_value().map_err(|e| e.to_string())?;
        check_chars(&value)?;
        element.attrs.push((local_name(key), value.into_owned()));
    }
    Ok(element)
}

fn check_chars(text: &str) -> Result<(), String> {
    match text.chars().find(|c| is_forbidden_control(*c)) {
        Some(c) => Err(format!("invalid character U+{:04X}", c as u32)),
        None => Ok(()),
    }
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<(), String> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(element);
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err("junk after document element".into()),
    }
}

fn append_text(stack: &mut [Element], root: &Option<Element>, text: Cow<'_, str>) -> Result<(), String> {
    check_chars(&text)?;
    if text.trim().is_empty() {
        return Ok(());
    }
    match stack.last_mut() {
        Some(el) => {
            el.text.push_str(&text);
            Ok(())
        }
        None if root.is_some() => Err("junk after document element".into()),
        None => Err("text before document element".into()),
    }
}

fn build_tree(text: &str) -> Result<Element, String> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(e) => {
                if stack.is_empty() && root.is_some() {
                    return Err("junk after document element".into());
                }
                stack.push(open_element(&e)?);
            }
            Event::Empty(e) => {
                let element = open_element(&e)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack.pop().ok_or("unbalanced end tag")?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(|e| e.to_string())?;
                append_text(&mut stack, &root, text)?;
            }
            Event::CData(c) => {
                let raw = c.into_inner();
                let text = String::from_utf8_lossy(&raw).into_owned();
                append_text(&mut stack, &root, Cow::Owned(text))?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err("unexpected end of document".into());
    }
    root.ok_or_else(|| "no document element".to_string())
}

fn collect_tagged<'a>(element: &'a Element, tag: &str, out: &mut Vec<&'a Element>) {
    for child in &element.children {
        if child.tag == tag {
            out.push(child);
        }
        collect_tagged(child, tag, out);
    }
}

fn select_records(root: &Element) -> Vec<&Element> {
    for tag in CANDIDATE_TAGS {
        let mut found = Vec::new();
        collect_tagged(root, tag, &mut found);
        if !found.is_empty() {
            return found;
        }
    }
    root.children.iter().collect()
}

fn flatten(element: &Element) -> RawRecord {
    let mut record = RawRecord::new();
    push_element(&mut record, element);
    for child in &element.children {
        push_element(&mut record, child);
    }
    record
}

fn push_element(record: &mut RawRecord, element: &Element) {
    let text = element.text.trim();
    if !text.is_empty() {
        record.insert(element.tag.clone(), text);
    }
    for (key, value) in &element.attrs {
        record.insert(format!("{}_{}", element.tag, key), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_tag_records_are_flattened() {
        let xml = r#"<?xml version="1.0"?>
            <patents>
              <patent id="7">
                <title lang="en">Widget</title>
                <patent_number>CA1</patent_number>
                <empty/>
              </patent>
              <patent id="8"><title>Gadget &amp; co</title></patent>
            </patents>"#;
        let records = parse(xml).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("patent_id"), Some("7"));
        assert_eq!(records[0].get("title"), Some("Widget"));
        assert_eq!(records[0].get("title_lang"), Some("en"));
        assert_eq!(records[0].get("patent_number"), Some("CA1"));
        assert_eq!(records[1].get("title"), Some("Gadget & co"));
    }

    #[test]
    fn root_children_used_without_candidate_tags() {
        let xml = "<rows><row><name>A</name></row><row><name>B</name></row></rows>";
        let records = parse(xml).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].get("name"), Some("B"));
    }

    #[test]
    fn namespace_prefixes_are_dropped() {
        let xml = r#"<ns:feed xmlns:ns="urn:x"><ns:entry><ns:title>T</ns:title></ns:entry></ns:feed>"#;
        let records = parse(xml).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("title"), Some("T"));
    }

    #[test]
    fn control_characters_are_stripped_on_retry() {
        let xml = "<records><record><title>Bad\u{1}Title</title></record></records>";
        let records = parse(xml).unwrap();
        assert_eq!(records[0].get("title"), Some("BadTitle"));
    }

    #[test]
    fn non_xml_is_rejected() {
        assert!(matches!(parse("title|number"), Err(ParseError::Xml(_))));
        assert!(parse("<a><b></a>").is_err());
    }
}
