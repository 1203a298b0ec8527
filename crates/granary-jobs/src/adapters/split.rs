//! Heading-aware hierarchical splitter.
//!
//! Walks the document linearly: text before any heading becomes top-level
//! segments; each markdown heading starts a new top-level segment holding
//! the heading line, with the section body chunked beneath it. Positions
//! come out as `"1"`, `"2"`, `"2.1"`, `"2.2"`, … so parent/sibling
//! navigation works over real document structure.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use tracing::debug;

use granary_core::traits::Splitter;
use granary_core::{new_v7, Document, Result, ResultCode, Segment};
use granary_db::{Chunker, ChunkerConfig, Database, ParagraphChunker};

/// One top-level region of the document: an optional heading line plus the
/// body up to the next heading.
struct Section<'a> {
    heading: Option<&'a str>,
    heading_start: usize,
    body: &'a str,
    body_start: usize,
}

/// [`Splitter`] producing hierarchically positioned segments.
pub struct HierarchicalSplitter {
    db: Arc<Database>,
    chunker: ParagraphChunker,
    heading_re: Regex,
}

impl HierarchicalSplitter {
    pub fn new(db: Arc<Database>, config: ChunkerConfig) -> Self {
        Self {
            db,
            chunker: ParagraphChunker::new(config),
            heading_re: Regex::new(r"(?m)^(#{1,6})\s+(.+)$").expect("static heading pattern"),
        }
    }

    fn sections<'a>(&self, content: &'a str) -> Vec<Section<'a>> {
        let mut sections = Vec::new();
        let heading_spans: Vec<(usize, usize)> =
            self.heading_re.find_iter(content).map(|m| (m.start(), m.end())).collect();

        let first_heading = heading_spans.first().map(|(s, _)| *s).unwrap_or(content.len());
        if first_heading > 0 {
            sections.push(Section {
                heading: None,
                heading_start: 0,
                body: &content[..first_heading],
                body_start: 0,
            });
        }

        for (i, (start, end)) in heading_spans.iter().enumerate() {
            let body_end = heading_spans
                .get(i + 1)
                .map(|(next, _)| *next)
                .unwrap_or(content.len());
            sections.push(Section {
                heading: Some(content[*start..*end].trim()),
                heading_start: *start,
                body: &content[*end..body_end],
                body_start: *end,
            });
        }
        sections
    }

    fn build_segments(&self, document: &Document) -> Vec<Segment> {
        let sections = self.sections(&document.content);
        let has_headings = sections.iter().any(|s| s.heading.is_some());
        let mut segments = Vec::new();
        let mut top = 0u64;

        for section in sections {
            match section.heading {
                None if !has_headings => {
                    // Flat document: every chunk is a top-level segment.
                    for chunk in self.chunker.chunk(section.body) {
                        top += 1;
                        segments.push(self.segment(
                            document,
                            top.to_string(),
                            None,
                            &chunk.text,
                            section.body_start + chunk.start_offset,
                            section.body_start + chunk.end_offset,
                        ));
                    }
                }
                None => {
                    // Preamble before the first heading: top-level chunks.
                    for chunk in self.chunker.chunk(section.body) {
                        top += 1;
                        segments.push(self.segment(
                            document,
                            top.to_string(),
                            None,
                            &chunk.text,
                            section.body_start + chunk.start_offset,
                            section.body_start + chunk.end_offset,
                        ));
                    }
                }
                Some(heading) => {
                    top += 1;
                    let title = heading.trim_start_matches('#').trim();
                    segments.push(self.segment(
                        document,
                        top.to_string(),
                        Some(title),
                        heading,
                        section.heading_start,
                        section.heading_start + heading.len(),
                    ));
                    for (child, chunk) in self.chunker.chunk(section.body).into_iter().enumerate() {
                        segments.push(self.segment(
                            document,
                            format!("{}.{}", top, child + 1),
                            Some(title),
                            &chunk.text,
                            section.body_start + chunk.start_offset,
                            section.body_start + chunk.end_offset,
                        ));
                    }
                }
            }
        }
        segments
    }

    fn segment(
        &self,
        document: &Document,
        position: String,
        heading: Option<&str>,
        content: &str,
        start: usize,
        end: usize,
    ) -> Segment {
        Segment {
            id: new_v7(),
            document_id: document.id,
            docsink_id: document.docsink_id,
            kb_id: document.kb_id,
            content: content.to_string(),
            position_in_doc: position,
            heading: heading.map(String::from),
            start_offset: start as i64,
            end_offset: end as i64,
            label: None,
            embedding: None,
            is_deleted: false,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
impl Splitter for HierarchicalSplitter {
    async fn split(&self, document: &Document) -> Result<ResultCode> {
        let segments = self.build_segments(document);
        debug!(
            document_id = %document.id,
            segment_count = segments.len(),
            "split document"
        );
        self.db.segments.insert_many(&segments).await?;
        Ok(ResultCode::Success)
    }
}
