//! The `<matches>` bulk document: parsing and writing.
//!
//! ```xml
//! <matches>
//!   <match id="1" src="wall3_f12" tgt="wall3_f40" error="0.12" status="confirmed"
//!          xf="1 0 0 0.5 0 1 0 0 0 0 1 0 0 0 0 1" conflict="4 9"/>
//! </matches>
//! ```

use std::io::{BufRead, Write};
use std::path::Path;

use fragmatch_db::Transform;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;

use crate::error::ImportError;

const ROOT: &str = "matches";
const MATCH: &str = "match";

/// One `<match>` element.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MatchRecord {
    /// Explicit id, if the document carries one.
    pub id: Option<i64>,
    pub source: String,
    pub target: String,
    pub transform: Transform,
    pub conflicts: Vec<i64>,
    /// Every other attribute as `(name, raw value)`, in document order.
    pub attributes: Vec<(String, String)>,
}

impl MatchRecord {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MatchDocument {
    pub matches: Vec<MatchRecord>,
}

impl MatchDocument {
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Attribute names in order of first appearance, case-insensitively unique.
    pub fn attribute_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for record in &self.matches {
            for (name, _) in &record.attributes {
                if !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                    names.push(name);
                }
            }
        }
        names
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Parse a match document.
pub fn parse_matches<R: BufRead>(reader: R) -> Result<MatchDocument, ImportError> {
    let mut xml = Reader::from_reader(reader);
    xml.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut doc = MatchDocument::default();
    let mut seen_root = false;
    let mut depth = 0usize;

    loop {
        match xml.read_event_into(&mut buf)? {
            Event::Start(ref e) => {
                depth += 1;
                match (depth, e.name().as_ref()) {
                    (1, b"matches") => seen_root = true,
                    (2, b"match") => doc.matches.push(parse_match(e, doc.matches.len())?),
                    (1, other) => return Err(unexpected_root(other)),
                    _ => {}
                }
            }
            Event::Empty(ref e) => match (depth, e.name().as_ref()) {
                (0, b"matches") => seen_root = true,
                (1, b"match") => doc.matches.push(parse_match(e, doc.matches.len())?),
                (0, other) => return Err(unexpected_root(other)),
                _ => {}
            },
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !seen_root {
        return Err(ImportError::invalid_document(format!(
            "no <{ROOT}> root element"
        )));
    }
    Ok(doc)
}

/// Parse a match document from a file path.
pub fn parse_matches_file(path: &Path) -> Result<MatchDocument, ImportError> {
    let file = std::fs::File::open(path)?;
    parse_matches(std::io::BufReader::new(file))
}

fn unexpected_root(name: &[u8]) -> ImportError {
    ImportError::invalid_document(format!(
        "expected <{ROOT}> root element, found <{}>",
        String::from_utf8_lossy(name)
    ))
}

fn parse_match(e: &BytesStart<'_>, index: usize) -> Result<MatchRecord, ImportError> {
    let mut record = MatchRecord::default();
    let mut source = None;
    let mut target = None;
    let invalid = |what: String| ImportError::invalid_document(format!("match #{}: {what}", index + 1));

    for attr in e.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr.unescape_value()?.to_string();
        match key.as_str() {
            "id" => {
                let id = value
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| invalid(format!("invalid id '{value}'")))?;
                record.id = Some(id);
            }
            "src" => source = Some(value),
            "tgt" => target = Some(value),
            "xf" => {
                record.transform = value
                    .parse()
                    .map_err(|e| invalid(format!("invalid xf: {e}")))?;
            }
            "conflict" => {
                record.conflicts = value
                    .split_whitespace()
                    .map(|id| {
                        id.parse::<i64>()
                            .map_err(|_| invalid(format!("invalid conflict id '{id}'")))
                    })
                    .collect::<Result<_, _>>()?;
            }
            _ => record.attributes.push((key, value)),
        }
    }

    record.source = source.ok_or_else(|| invalid("missing 'src'".to_string()))?;
    record.target = target.ok_or_else(|| invalid("missing 'tgt'".to_string()))?;
    Ok(record)
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Write a match document, one `<match>` element per record.
pub fn write_matches<W: Write>(writer: W, doc: &MatchDocument) -> Result<(), ImportError> {
    let mut xml = Writer::new_with_indent(writer, b' ', 2);
    xml.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    xml.write_event(Event::Start(BytesStart::new(ROOT)))?;

    for record in &doc.matches {
        let mut element = BytesStart::new(MATCH);
        let id = record.id.map(|id| id.to_string());
        if let Some(id) = &id {
            element.push_attribute(("id", id.as_str()));
        }
        element.push_attribute(("src", record.source.as_str()));
        element.push_attribute(("tgt", record.target.as_str()));
        for (name, value) in &record.attributes {
            element.push_attribute((name.as_str(), value.as_str()));
        }
        let xf = record.transform.to_string();
        element.push_attribute(("xf", xf.as_str()));
        if !record.conflicts.is_empty() {
            let conflicts = record
                .conflicts
                .iter()
                .map(i64::to_string)
                .collect::<Vec<_>>()
                .join(" ");
            element.push_attribute(("conflict", conflicts.as_str()));
        }
        xml.write_event(Event::Empty(element))?;
    }

    xml.write_event(Event::End(BytesEnd::new(ROOT)))?;
    xml.get_mut().write_all(b"\n")?;
    Ok(())
}
