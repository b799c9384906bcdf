//! Multi-format text extraction.
//!
//! Turns raw file bytes into ordered [`TextSegment`]s tagged with page
//! number and section title. Supported formats are plain text, markdown,
//! PDF, and structured XML.
//!
//! Malformed or password-protected input is fatal ([`ExtractError`]).
//! Partially readable input (an empty PDF page, invalid UTF-8 in a text
//! file) only adds a warning to [`ExtractedDocument::warnings`].
//!
//! XML is the one format whose structure is authoritative at extraction
//! time: repeated record elements are rendered as tables together with
//! descriptive sentences, and the document is flagged
//! [`pre_enriched`](ExtractedDocument::pre_enriched) so the enrichment
//! stage passes it through untouched.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::BTreeSet;
use thiserror::Error;

use crate::chunk::estimate_tokens;

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_XML: &str = "application/xml";

/// Deepest element nesting accepted in XML input.
const XML_MAX_DEPTH: usize = 256;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("PDF is password-protected")]
    PasswordProtected,
    #[error("malformed XML: {0}")]
    Xml(String),
}

/// Source format, resolved from the declared MIME type or the filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    PlainText,
    Markdown,
    Pdf,
    Xml,
}

impl DocumentFormat {
    /// Resolve the format. The declared MIME type wins; generic types such
    /// as `application/octet-stream` fall back to the file extension.
    pub fn detect(mime_type: &str, filename: &str) -> Result<Self, ExtractError> {
        let mime = mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        let by_mime = match mime.as_str() {
            MIME_TEXT | "text/csv" => Some(DocumentFormat::PlainText),
            MIME_MARKDOWN | "text/x-markdown" => Some(DocumentFormat::Markdown),
            MIME_PDF => Some(DocumentFormat::Pdf),
            MIME_XML | "text/xml" => Some(DocumentFormat::Xml),
            m if m.ends_with("+xml") => Some(DocumentFormat::Xml),
            _ => None,
        };
        if let Some(format) = by_mime {
            return Ok(format);
        }

        let ext = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "txt" | "text" | "log" | "csv" | "tsv" => Ok(DocumentFormat::PlainText),
            "md" | "markdown" => Ok(DocumentFormat::Markdown),
            "pdf" => Ok(DocumentFormat::Pdf),
            "xml" => Ok(DocumentFormat::Xml),
            _ => Err(ExtractError::UnsupportedContentType(if mime.is_empty() {
                filename.to_string()
            } else {
                mime
            })),
        }
    }

    /// Best-guess MIME type for a filename, used when registering files.
    pub fn mime_for_filename(filename: &str) -> &'static str {
        match DocumentFormat::detect("", filename) {
            Ok(DocumentFormat::PlainText) => MIME_TEXT,
            Ok(DocumentFormat::Markdown) => MIME_MARKDOWN,
            Ok(DocumentFormat::Pdf) => MIME_PDF,
            Ok(DocumentFormat::Xml) => MIME_XML,
            Err(_) => "application/octet-stream",
        }
    }
}

/// Structure described inline by the extractor (XML only).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentStructure {
    pub tables: Vec<String>,
    pub synthetic_sentences: usize,
}

/// A contiguous piece of document text with its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSegment {
    pub text: String,
    pub page_number: Option<u32>,
    pub section_title: Option<String>,
    pub structure: Option<SegmentStructure>,
}

impl TextSegment {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            page_number: None,
            section_title: None,
            structure: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub format: DocumentFormat,
    pub segments: Vec<TextSegment>,
    pub warnings: Vec<String>,
    pub estimated_tokens: usize,
    /// Segments already describe their own structure; skip enrichment.
    pub pre_enriched: bool,
}

/// Extract text segments from raw bytes.
pub fn extract(
    bytes: &[u8],
    filename: &str,
    mime_type: &str,
) -> Result<ExtractedDocument, ExtractError> {
    let format = DocumentFormat::detect(mime_type, filename)?;
    let mut warnings = Vec::new();

    let segments = match format {
        DocumentFormat::PlainText => {
            let text = decode_utf8(bytes, &mut warnings);
            extract_plain_text(&text, &mut warnings)
        }
        DocumentFormat::Markdown => {
            let text = decode_utf8(bytes, &mut warnings);
            extract_markdown(&text)
        }
        DocumentFormat::Pdf => extract_pdf(bytes, &mut warnings)?,
        DocumentFormat::Xml => {
            let text = decode_utf8(bytes, &mut warnings);
            extract_xml(&text)?
        }
    };

    let segments: Vec<TextSegment> = segments
        .into_iter()
        .filter(|s| !s.text.trim().is_empty())
        .collect();
    let estimated_tokens = segments.iter().map(|s| estimate_tokens(&s.text)).sum();

    Ok(ExtractedDocument {
        format,
        segments,
        warnings,
        estimated_tokens,
        pre_enriched: format == DocumentFormat::Xml,
    })
}

fn decode_utf8(bytes: &[u8], warnings: &mut Vec<String>) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.trim_start_matches('\u{feff}').to_string(),
        Err(_) => {
            warnings.push("file contained invalid UTF-8; bad sequences were replaced".to_string());
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

// ============ Plain text ============

/// Form feeds separate pages. A single-page file carries no page number.
fn extract_plain_text(text: &str, warnings: &mut Vec<String>) -> Vec<TextSegment> {
    let pages: Vec<&str> = text.split('\u{000C}').collect();
    if pages.len() == 1 {
        return vec![TextSegment::new(text.trim())];
    }

    let mut segments = Vec::with_capacity(pages.len());
    for (i, page) in pages.iter().enumerate() {
        let page_number = i as u32 + 1;
        let text = page.trim();
        if text.is_empty() {
            warnings.push(format!("page {} contained no extractable text", page_number));
            continue;
        }
        segments.push(TextSegment {
            page_number: Some(page_number),
            ..TextSegment::new(text)
        });
    }
    segments
}

// ============ Markdown ============

fn extract_markdown(text: &str) -> Vec<TextSegment> {
    let mut segments = Vec::new();
    let mut title: Option<String> = None;
    let mut buf = String::new();
    let mut in_fence = false;

    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
        }

        if !in_fence {
            if let Some(heading) = parse_atx_heading(trimmed) {
                if !buf.trim().is_empty() {
                    segments.push(TextSegment {
                        section_title: title.clone(),
                        ..TextSegment::new(buf.trim())
                    });
                }
                buf.clear();
                title = Some(heading);
            }
        }

        buf.push_str(line);
        buf.push('\n');
    }

    if !buf.trim().is_empty() {
        segments.push(TextSegment {
            section_title: title,
            ..TextSegment::new(buf.trim())
        });
    }
    segments
}

fn parse_atx_heading(line: &str) -> Option<String> {
    let level = line.chars().take_while(|&c| c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &line[level..];
    if !rest.is_empty() && !rest.starts_with(' ') && !rest.starts_with('\t') {
        return None;
    }
    let title = rest.trim().trim_end_matches('#').trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

// ============ PDF ============

fn extract_pdf(bytes: &[u8], warnings: &mut Vec<String>) -> Result<Vec<TextSegment>, ExtractError> {
    if !bytes.starts_with(b"%PDF") {
        return Err(ExtractError::Pdf("missing %PDF header".to_string()));
    }

    // pdf-extract panics on some malformed inputs. Files encrypted with an
    // empty user password are decrypted by the parser itself.
    let pages = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
        .map_err(|_| ExtractError::Pdf("parser panicked on malformed input".to_string()))?
        .map_err(pdf_error)?;

    let mut segments = Vec::with_capacity(pages.len());
    for (i, page) in pages.iter().enumerate() {
        let page_number = i as u32 + 1;
        let text = page.trim();
        if text.is_empty() {
            warnings.push(format!(
                "page {} contained no extractable text",
                page_number
            ));
            continue;
        }
        segments.push(TextSegment {
            page_number: Some(page_number),
            ..TextSegment::new(text)
        });
    }
    Ok(segments)
}

fn pdf_error(err: pdf_extract::OutputError) -> ExtractError {
    match err {
        pdf_extract::OutputError::PdfError(e) if is_decryption_failure(&e.to_string()) => {
            ExtractError::PasswordProtected
        }
        other => ExtractError::Pdf(other.to_string()),
    }
}

/// lopdf reports a failed decryption as "decryption error: ..." (wrong or
/// missing password, unsupported security handler).
fn is_decryption_failure(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("decrypt") || lower.contains("password")
}

// ============ XML ============

#[derive(Debug, Default)]
struct XmlNode {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<XmlNode>,
    text: String,
}

impl XmlNode {
    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// A record is an element whose fields are all leaves or attributes.
    fn is_record(&self) -> bool {
        (!self.children.is_empty() || !self.attrs.is_empty())
            && self.children.iter().all(XmlNode::is_leaf)
    }

    fn fields(&self) -> Vec<(String, String)> {
        let mut fields: Vec<(String, String)> = self.attrs.clone();
        for child in &self.children {
            let value = child.text.trim();
            if !value.is_empty() {
                fields.push((child.name.clone(), value.to_string()));
            }
        }
        fields
    }

    fn title(&self) -> String {
        for key in ["name", "title"] {
            if let Some((_, v)) = self.attrs.iter().find(|(k, _)| k == key) {
                if !v.trim().is_empty() {
                    return v.trim().to_string();
                }
            }
            if let Some(child) = self.children.iter().find(|c| c.name == key && c.is_leaf()) {
                if !child.text.trim().is_empty() {
                    return child.text.trim().to_string();
                }
            }
        }
        humanize(&self.name)
    }
}

fn parse_xml_tree(xml: &str) -> Result<XmlNode, ExtractError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if root.is_some() {
                    return Err(ExtractError::Xml("content after root element".to_string()));
                }
                if stack.len() >= XML_MAX_DEPTH {
                    return Err(ExtractError::Xml("element nesting too deep".to_string()));
                }
                stack.push(start_node(&e)?);
            }
            Ok(Event::Empty(e)) => {
                let node = start_node(&e)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None if root.is_none() => root = Some(node),
                    None => {
                        return Err(ExtractError::Xml("content after root element".to_string()))
                    }
                }
            }
            Ok(Event::End(_)) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| ExtractError::Xml("unexpected closing tag".to_string()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = Some(node),
                }
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|e| ExtractError::Xml(e.to_string()))?;
                append_text(&mut stack, &text);
            }
            Ok(Event::CData(c)) => {
                let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                append_text(&mut stack, &text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Xml(e.to_string())),
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(ExtractError::Xml("unexpected end of document".to_string()));
    }
    root.ok_or_else(|| ExtractError::Xml("no root element".to_string()))
}

fn start_node(e: &quick_xml::events::BytesStart<'_>) -> Result<XmlNode, ExtractError> {
    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| ExtractError::Xml(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        if attr.key.as_ref().starts_with(b"xmlns") {
            continue;
        }
        let value = attr
            .unescape_value()
            .map_err(|e| ExtractError::Xml(e.to_string()))?
            .into_owned();
        attrs.push((key, value));
    }
    Ok(XmlNode {
        name,
        attrs,
        ..Default::default()
    })
}

fn append_text(stack: &mut [XmlNode], text: &str) {
    if let Some(node) = stack.last_mut() {
        if !node.text.is_empty() {
            node.text.push(' ');
        }
        node.text.push_str(text.trim());
    }
}

/// One section per child of the root element.
fn extract_xml(xml: &str) -> Result<Vec<TextSegment>, ExtractError> {
    let root = parse_xml_tree(xml)?;

    let sections: Vec<&XmlNode> = if root.children.iter().any(|c| !c.is_leaf()) {
        root.children.iter().collect()
    } else {
        vec![&root]
    };

    let mut segments = Vec::new();
    for section in sections {
        let title = section.title();
        let mut out = XmlRender::default();
        out.lines.push(title.clone());
        out.render_node(section, &title);

        if out.lines.len() <= 1 && section.text.trim().is_empty() {
            continue;
        }
        segments.push(TextSegment {
            text: out.lines.join("\n"),
            page_number: None,
            section_title: Some(title),
            structure: Some(SegmentStructure {
                tables: out.tables.into_iter().collect(),
                synthetic_sentences: out.sentences,
            }),
        });
    }

    if segments.is_empty() && !root.text.trim().is_empty() {
        segments.push(TextSegment {
            section_title: Some(root.title()),
            structure: Some(SegmentStructure::default()),
            ..TextSegment::new(root.text.trim())
        });
    }
    Ok(segments)
}

#[derive(Default)]
struct XmlRender {
    lines: Vec<String>,
    tables: BTreeSet<String>,
    sentences: usize,
}

impl XmlRender {
    fn render_node(&mut self, node: &XmlNode, context: &str) {
        if !node.text.trim().is_empty() && !node.is_leaf() {
            self.lines.push(node.text.trim().to_string());
        }
        for (k, v) in &node.attrs {
            if k != "name" && k != "title" {
                self.lines.push(format!("{}: {}", humanize(k), v));
            }
        }

        // Group record-like siblings sharing a tag name into tables.
        let mut seen: Vec<&str> = Vec::new();
        for child in &node.children {
            if seen.contains(&child.name.as_str()) {
                continue;
            }
            let group: Vec<&XmlNode> = node
                .children
                .iter()
                .filter(|c| c.name == child.name)
                .collect();

            if group.len() >= 2 && group.iter().all(|c| c.is_record()) {
                seen.push(&child.name);
                let table_name = format!("{} {}", context, humanize(&child.name));
                self.render_table(&table_name, &group);
            } else if child.is_leaf() {
                let value = child.text.trim();
                if !value.is_empty() && child.name != "name" && child.name != "title" {
                    self.lines.push(format!("{}: {}", humanize(&child.name), value));
                }
                for (k, v) in &child.attrs {
                    self.lines
                        .push(format!("{} {}: {}", humanize(&child.name), humanize(k), v));
                }
            } else {
                let title = child.title();
                self.lines.push(String::new());
                self.lines.push(title.clone());
                self.render_node(child, &title);
            }
        }
    }

    fn render_table(&mut self, table_name: &str, rows: &[&XmlNode]) {
        let row_fields: Vec<Vec<(String, String)>> = rows.iter().map(|r| r.fields()).collect();
        let mut headers: Vec<String> = Vec::new();
        for fields in &row_fields {
            for (k, _) in fields {
                if !headers.contains(k) {
                    headers.push(k.clone());
                }
            }
        }
        if headers.is_empty() {
            return;
        }
        self.tables.insert(table_name.to_string());

        self.lines.push(String::new());
        self.lines.push(format!("Table: {}", table_name));
        self.lines.push(format!("| {} |", headers.join(" | ")));
        self.lines.push(format!(
            "|{}|",
            headers.iter().map(|_| "---").collect::<Vec<_>>().join("|")
        ));
        for fields in &row_fields {
            let cells: Vec<&str> = headers
                .iter()
                .map(|h| {
                    fields
                        .iter()
                        .find(|(k, _)| k == h)
                        .map(|(_, v)| v.as_str())
                        .unwrap_or("")
                })
                .collect();
            self.lines.push(format!("| {} |", cells.join(" | ")));
        }

        self.lines.push(String::new());
        for (i, fields) in row_fields.iter().enumerate() {
            if fields.is_empty() {
                continue;
            }
            let parts: Vec<String> = fields
                .iter()
                .map(|(k, v)| format!("{} is {}", humanize(k), v))
                .collect();
            self.lines
                .push(format!("{} row {}: {}.", table_name, i + 1, parts.join(", ")));
            self.sentences += 1;
        }
    }
}

/// `exchangeAmount` / `exchange_amount` → `exchange amount`.
fn humanize(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c == '_' || c == '-' {
            out.push(' ');
            prev_lower = false;
        } else if c.is_uppercase() && prev_lower {
            out.push(' ');
            out.extend(c.to_lowercase());
            prev_lower = false;
        } else {
            out.extend(c.to_lowercase());
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_content_type_returns_error() {
        let err = extract(b"foo", "blob.bin", "application/octet-stream").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedContentType(_)));
    }

    #[test]
    fn generic_mime_falls_back_to_extension() {
        assert_eq!(
            DocumentFormat::detect("application/octet-stream", "notes.MD").unwrap(),
            DocumentFormat::Markdown
        );
        assert_eq!(
            DocumentFormat::detect("text/plain; charset=utf-8", "x.bin").unwrap(),
            DocumentFormat::PlainText
        );
        assert_eq!(
            DocumentFormat::detect("application/ilcd+xml", "x").unwrap(),
            DocumentFormat::Xml
        );
        assert_eq!(DocumentFormat::mime_for_filename("a.pdf"), MIME_PDF);
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract(b"not a pdf", "a.pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn decryption_failures_are_recognized() {
        assert!(is_decryption_failure(
            "decryption error: the supplied password is incorrect"
        ));
        assert!(is_decryption_failure("Decryption error: unsupported encryption"));
        assert!(!is_decryption_failure("invalid file header"));
        assert!(!is_decryption_failure("missing xref"));
    }

    #[test]
    fn plain_text_single_page_has_no_page_number() {
        let doc = extract(b"hello world", "a.txt", MIME_TEXT).unwrap();
        assert_eq!(doc.segments.len(), 1);
        assert_eq!(doc.segments[0].page_number, None);
        assert!(!doc.pre_enriched);
        assert_eq!(doc.estimated_tokens, 3);
    }

    #[test]
    fn form_feeds_split_pages() {
        let doc = extract(b"one\x0ctwo\x0c\x0cfour", "a.txt", MIME_TEXT).unwrap();
        let pages: Vec<Option<u32>> = doc.segments.iter().map(|s| s.page_number).collect();
        assert_eq!(pages, vec![Some(1), Some(2), Some(4)]);
        assert_eq!(doc.warnings, vec!["page 3 contained no extractable text"]);
    }

    #[test]
    fn invalid_utf8_is_a_warning() {
        let doc = extract(b"abc \xff def", "a.txt", MIME_TEXT).unwrap();
        assert_eq!(doc.segments.len(), 1);
        assert_eq!(doc.warnings.len(), 1);
    }

    #[test]
    fn markdown_sections_follow_headings() {
        let md = "intro line\n\n# Scope\nscope text\n\n```\n# not a heading\n```\n## Method ##\nmethod text\n";
        let doc = extract(md.as_bytes(), "a.md", MIME_MARKDOWN).unwrap();
        let titles: Vec<Option<&str>> = doc
            .segments
            .iter()
            .map(|s| s.section_title.as_deref())
            .collect();
        assert_eq!(titles, vec![None, Some("Scope"), Some("Method")]);
        assert!(doc.segments[1].text.contains("# not a heading"));
    }

    #[test]
    fn hashtag_is_not_a_heading() {
        assert_eq!(parse_atx_heading("#hashtag"), None);
        assert_eq!(parse_atx_heading("### Results"), Some("Results".to_string()));
    }

    #[test]
    fn xml_records_become_tables_with_sentences() {
        let xml = r#"<?xml version="1.0"?>
<process name="Cement production">
  <exchanges>
    <exchange><flow>CO2</flow><amount>0.82</amount><unit>kg</unit></exchange>
    <exchange><flow>CH4</flow><amount>0.001</amount><unit>kg</unit></exchange>
  </exchanges>
  <geography location="DE"><comment>Germany</comment></geography>
</process>"#;
        let doc = extract(xml.as_bytes(), "p.xml", MIME_XML).unwrap();
        assert!(doc.pre_enriched);
        assert_eq!(doc.segments.len(), 2);

        let exchanges = &doc.segments[0];
        assert_eq!(exchanges.section_title.as_deref(), Some("exchanges"));
        assert!(exchanges.text.contains("| flow | amount | unit |"));
        assert!(exchanges
            .text
            .contains("exchanges exchange row 1: flow is CO2, amount is 0.82, unit is kg."));
        let structure = exchanges.structure.as_ref().unwrap();
        assert_eq!(structure.tables, vec!["exchanges exchange".to_string()]);
        assert_eq!(structure.synthetic_sentences, 2);
    }

    #[test]
    fn malformed_xml_is_fatal() {
        let err = extract(b"<a><b></a>", "x.xml", MIME_XML).unwrap_err();
        assert!(matches!(err, ExtractError::Xml(_)));

        let err = extract(b"<a><b>text</b>", "x.xml", MIME_XML).unwrap_err();
        assert!(matches!(err, ExtractError::Xml(_)));
    }

    #[test]
    fn humanize_splits_camel_and_snake_case() {
        assert_eq!(humanize("exchangeAmount"), "exchange amount");
        assert_eq!(humanize("unit_group"), "unit group");
        assert_eq!(humanize("CO2"), "co2");
    }
}
