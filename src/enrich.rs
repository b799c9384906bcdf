//! Chunk enrichment.
//!
//! Tabular text embeds poorly: a row like `| Cement | 0.82 | kg |` carries
//! little meaning on its own. The [`TableEnricher`] detects tables in a
//! chunk and appends one plain sentence per cell ("In Emissions, Cement has
//! amount of 0.82.") to the text that gets embedded. The pre-enrichment
//! text is kept in [`ChunkMetadata::original_text`].
//!
//! Enrichment is best-effort. [`enrich_chunks`] falls back to the raw chunk
//! text when an enricher fails, and passes pre-enriched documents (XML)
//! through untouched.

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use crate::chunk::TextChunk;
use crate::config::EnrichmentConfig;
use crate::extract::ExtractedDocument;
use crate::models::{ChunkEnrichment, ChunkMetadata};

/// Output of a single enrichment call.
#[derive(Debug, Clone, PartialEq)]
pub struct Enrichment {
    pub text: String,
    pub kind: ChunkEnrichment,
}

impl Enrichment {
    pub fn unchanged(text: &str) -> Self {
        Self {
            text: text.to_string(),
            kind: ChunkEnrichment::Plain,
        }
    }
}

/// Augments chunk text before embedding.
#[async_trait]
pub trait Enricher: Send + Sync {
    /// Identifier recorded in chunk metadata (`enriched_by`).
    fn name(&self) -> &str;

    /// Enrich one chunk. Returning `Err` is non-fatal; the caller keeps
    /// the original text.
    async fn enrich(&self, chunk: &TextChunk) -> Result<Enrichment>;
}

/// Enriched text and metadata for every chunk, in chunk order.
#[derive(Debug, Clone)]
pub struct EnrichedChunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Run the enrichment stage over a file's chunks.
///
/// Never fails: a chunk whose enrichment errors keeps its raw text.
pub async fn enrich_chunks(
    enricher: Option<&dyn Enricher>,
    file_id: &str,
    doc: &ExtractedDocument,
    chunks: &[TextChunk],
) -> Vec<EnrichedChunk> {
    let mut out = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        if doc.pre_enriched {
            out.push(EnrichedChunk {
                text: chunk.text.clone(),
                metadata: structured_metadata(doc, chunk),
            });
            continue;
        }

        let Some(enricher) = enricher else {
            out.push(EnrichedChunk {
                text: chunk.text.clone(),
                metadata: ChunkMetadata::plain(),
            });
            continue;
        };

        let enriched = match enricher.enrich(chunk).await {
            Ok(e) if e.kind == ChunkEnrichment::Plain => EnrichedChunk {
                text: chunk.text.clone(),
                metadata: ChunkMetadata::plain(),
            },
            Ok(e) => EnrichedChunk {
                text: e.text,
                metadata: ChunkMetadata {
                    enrichment: e.kind,
                    original_text: Some(chunk.text.clone()),
                    enriched_by: Some(enricher.name().to_string()),
                },
            },
            Err(e) => {
                warn!(
                    file_id,
                    chunk_index = chunk.chunk_index,
                    enricher = enricher.name(),
                    error = %e,
                    "enrichment failed, keeping original chunk text"
                );
                EnrichedChunk {
                    text: chunk.text.clone(),
                    metadata: ChunkMetadata::plain(),
                }
            }
        };
        out.push(enriched);
    }
    out
}

/// Metadata for chunks of a pre-enriched document, taken from the
/// segments the chunk was drawn from.
fn structured_metadata(doc: &ExtractedDocument, chunk: &TextChunk) -> ChunkMetadata {
    let (first, last) = chunk.segments;
    let mut tables: Vec<String> = Vec::new();
    let mut sentences = 0;
    for seg in doc.segments.iter().take(last + 1).skip(first) {
        if let Some(structure) = &seg.structure {
            for t in &structure.tables {
                if !tables.contains(t) {
                    tables.push(t.clone());
                }
            }
            sentences += structure.synthetic_sentences;
        }
    }
    ChunkMetadata {
        enrichment: ChunkEnrichment::Structured {
            tables,
            synthetic_sentences: sentences,
        },
        original_text: None,
        enriched_by: Some("xml-extractor".to_string()),
    }
}

// ============ Table heuristic ============

/// Detects markdown pipe tables and tab/comma delimited blocks and
/// describes each cell in a sentence.
pub struct TableEnricher {
    max_sentences: usize,
}

impl TableEnricher {
    pub fn new(max_sentences: usize) -> Self {
        Self { max_sentences }
    }

    pub fn from_config(config: &EnrichmentConfig) -> Self {
        Self::new(config.max_sentences)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct DetectedTable {
    name: Option<String>,
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

#[async_trait]
impl Enricher for TableEnricher {
    fn name(&self) -> &str {
        "table-heuristic"
    }

    async fn enrich(&self, chunk: &TextChunk) -> Result<Enrichment> {
        let tables = detect_tables(&chunk.text);
        if tables.is_empty() {
            return Ok(Enrichment::unchanged(&chunk.text));
        }

        let fallback_name = chunk
            .section_title
            .clone()
            .unwrap_or_else(|| "table".to_string());

        let mut sentences: Vec<String> = Vec::new();
        for table in &tables {
            let name = table.name.as_deref().unwrap_or(&fallback_name);
            for row in &table.rows {
                let Some(label) = row.first().filter(|l| !l.is_empty()) else {
                    continue;
                };
                for (header, value) in table.header.iter().zip(row.iter()).skip(1) {
                    if value.is_empty() || header.is_empty() {
                        continue;
                    }
                    if sentences.len() >= self.max_sentences {
                        break;
                    }
                    sentences.push(format!("In {}, {} has {} of {}.", name, label, header, value));
                }
            }
        }

        if sentences.is_empty() {
            return Ok(Enrichment::unchanged(&chunk.text));
        }

        let table_name = tables[0]
            .name
            .clone()
            .unwrap_or_else(|| fallback_name.clone());
        let row_count = tables.iter().map(|t| t.rows.len()).sum();
        let synthetic_sentences = sentences.len();

        Ok(Enrichment {
            text: format!("{}\n\n{}", chunk.text, sentences.join("\n")),
            kind: ChunkEnrichment::Table {
                table_name,
                row_count,
                synthetic_sentences,
            },
        })
    }
}

fn detect_tables(text: &str) -> Vec<DetectedTable> {
    let lines: Vec<&str> = text.lines().collect();
    let mut tables = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i].trim();

        if line.starts_with('|') {
            let start = i;
            let mut rows = Vec::new();
            while i < lines.len() && lines[i].trim().starts_with('|') {
                let row = lines[i].trim();
                if !is_separator_row(row) {
                    rows.push(split_pipe_row(row));
                }
                i += 1;
            }
            push_table(&mut tables, &lines, start, rows, 2);
            continue;
        }

        if let Some(delim) = delimiter_of(line) {
            let cols = line.split(delim).count();
            let start = i;
            let mut rows = Vec::new();
            while i < lines.len() {
                let row = lines[i].trim();
                if delimiter_of(row) != Some(delim) || row.split(delim).count() != cols {
                    break;
                }
                rows.push(row.split(delim).map(|c| c.trim().to_string()).collect());
                i += 1;
            }
            // Prose commas line up by accident more easily than tabs do.
            let min_rows = if delim == '\t' { 2 } else { 3 };
            push_table(&mut tables, &lines, start, rows, min_rows);
            continue;
        }

        i += 1;
    }

    tables
}

fn push_table(
    tables: &mut Vec<DetectedTable>,
    lines: &[&str],
    start: usize,
    mut rows: Vec<Vec<String>>,
    min_rows: usize,
) {
    if rows.len() < min_rows || rows[0].len() < 2 {
        return;
    }
    let header = rows.remove(0);
    tables.push(DetectedTable {
        name: caption_before(lines, start),
        header,
        rows,
    });
}

fn delimiter_of(line: &str) -> Option<char> {
    if line.contains('\t') {
        Some('\t')
    } else if line.contains(',') {
        Some(',')
    } else {
        None
    }
}

fn is_separator_row(row: &str) -> bool {
    row.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

fn split_pipe_row(row: &str) -> Vec<String> {
    let inner = row.trim().trim_start_matches('|').trim_end_matches('|');
    inner.split('|').map(|c| c.trim().to_string()).collect()
}

/// `Table 3: Emissions by source` above a table names it.
fn caption_before(lines: &[&str], start: usize) -> Option<String> {
    let caption = lines[..start]
        .iter()
        .rev()
        .map(|l| l.trim())
        .find(|l| !l.is_empty())?;
    let lower = caption.to_ascii_lowercase();
    if !lower.starts_with("table") {
        return None;
    }
    let name = match caption.split_once(':') {
        Some((_, rest)) if !rest.trim().is_empty() => rest.trim(),
        _ => caption,
    };
    Some(name.to_string())
}
