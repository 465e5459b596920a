//! Markdown chunking with overlap, heading-aware splits, and atomic
//! fenced blocks.

use std::collections::BTreeMap;
use std::ops::Range;

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag};

use crate::corpus::Document;
use crate::error::{IndexError, Result};

/// One contiguous slice of a document's normalized body. `start` is the
/// byte offset into the normalized text; overlapping slices reconstruct
/// the body losslessly.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub doc_id: String,
    pub text: String,
    pub position: usize,
    pub start: usize,
}

/// Chunker configuration.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Preferred chunk size in bytes (default: 1000).
    pub target_chars: usize,
    /// Hard bound a chunk may grow to when keeping an atomic unit whole
    /// (default: 2000).
    pub max_chars: usize,
    /// Overlap carried into the next chunk (default: 200).
    pub overlap_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_chars: 1000,
            max_chars: 2000,
            overlap_chars: 200,
        }
    }
}

/// Split points are preferred in order: section headings, paragraph
/// breaks, line breaks, spaces. The byte offset shift places the
/// separator with the preceding chunk.
const SEPARATORS: [(&str, usize, u8); 5] = [
    ("\n## ", 1, 0),
    ("\n### ", 1, 1),
    ("\n\n", 2, 2),
    ("\n", 1, 3),
    (" ", 1, 4),
];

/// Split a document into overlapping chunks covering the whole body.
///
/// Never splits inside a fenced code block or table that fits within
/// `max_chars`; oversized atomic units fall back to line-break splits.
/// Pure function over the input text.
///
/// # Errors
///
/// `IndexError::EmptyDocument` if the body is empty or whitespace-only;
/// `IndexError::Unsplittable` if a stretch longer than `max_chars` has no
/// split point at all.
pub fn chunk_document(doc: &Document, config: &ChunkerConfig) -> Result<Vec<Chunk>> {
    let normalized = normalize(&doc.body);
    if normalized.is_empty() {
        return Err(IndexError::EmptyDocument {
            doc_id: doc.id.clone(),
        });
    }

    if normalized.len() <= config.target_chars {
        return Ok(vec![make_chunk(doc, 0, 0, normalized)]);
    }

    let protected = protected_ranges(&normalized);
    let breaks = collect_breaks(&normalized, &protected);
    let all_breaks = collect_breaks(&normalized, &[]);

    let mut chunks = Vec::new();
    let mut cursor = 0usize;

    while normalized.len() - cursor > config.target_chars {
        let end = next_split(&normalized, cursor, &breaks, &all_breaks, config).ok_or_else(
            || IndexError::Unsplittable {
                doc_id: doc.id.clone(),
            },
        )?;

        chunks.push(make_chunk(
            doc,
            chunks.len(),
            cursor,
            normalized[cursor..end].to_owned(),
        ));

        cursor = overlap_start(cursor, end, &breaks, config);
    }

    chunks.push(make_chunk(
        doc,
        chunks.len(),
        cursor,
        normalized[cursor..].to_owned(),
    ));

    Ok(chunks)
}

/// Normalize line endings and trim outer whitespace. Chunk offsets are
/// relative to this text, not the raw file content.
#[must_use]
pub fn normalize(body: &str) -> String {
    body.replace("\r\n", "\n").trim().to_owned()
}

fn make_chunk(doc: &Document, position: usize, start: usize, text: String) -> Chunk {
    Chunk {
        id: format!("{}_{position}", doc.id),
        doc_id: doc.id.clone(),
        text,
        position,
        start,
    }
}

/// Byte ranges of fenced code blocks and tables; split points strictly
/// inside them are rejected.
fn protected_ranges(text: &str) -> Vec<Range<usize>> {
    let parser = Parser::new_ext(text, Options::ENABLE_TABLES);
    let mut ranges: Vec<Range<usize>> = Vec::new();

    for (event, range) in parser.into_offset_iter() {
        match event {
            Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(_)) | Tag::Table(_)) => {
                // Offset ranges of Start events span the whole element.
                if ranges.last().is_none_or(|prev| range.start >= prev.end) {
                    ranges.push(range);
                }
            }
            _ => {}
        }
    }

    ranges
}

/// All candidate split offsets with their best (lowest) priority.
fn collect_breaks(text: &str, protected: &[Range<usize>]) -> Vec<(usize, u8)> {
    let mut best: BTreeMap<usize, u8> = BTreeMap::new();

    for (pattern, shift, priority) in SEPARATORS {
        for (i, _) in text.match_indices(pattern) {
            let offset = i + shift;
            if offset >= text.len() {
                continue;
            }
            if protected
                .iter()
                .any(|r| offset > r.start && offset < r.end)
            {
                continue;
            }
            best.entry(offset)
                .and_modify(|p| *p = (*p).min(priority))
                .or_insert(priority);
        }
    }

    best.into_iter().collect()
}

/// Choose the split offset for the chunk starting at `cursor`: the best
/// break within the target window, else within the max window, else any
/// break at all (inside an oversized atomic unit) within the max window.
fn next_split(
    text: &str,
    cursor: usize,
    breaks: &[(usize, u8)],
    all_breaks: &[(usize, u8)],
    config: &ChunkerConfig,
) -> Option<usize> {
    let target_end = (cursor + config.target_chars).min(text.len());
    let max_end = (cursor + config.max_chars).min(text.len());

    best_break(breaks, cursor, target_end)
        .or_else(|| best_break(breaks, cursor, max_end))
        .or_else(|| best_break(all_breaks, cursor, max_end))
}

/// Highest-priority break in `(after, upto]`; ties go to the latest
/// offset so chunks stay close to the target size.
fn best_break(breaks: &[(usize, u8)], after: usize, upto: usize) -> Option<usize> {
    breaks
        .iter()
        .filter(|(offset, _)| *offset > after && *offset <= upto)
        .min_by(|(a_off, a_pri), (b_off, b_pri)| a_pri.cmp(b_pri).then(b_off.cmp(a_off)))
        .map(|(offset, _)| *offset)
}

/// Start of the next chunk: back off up to `overlap_chars` from the split,
/// landing on a token boundary. Falls back to a zero-overlap start when no
/// boundary exists in the overlap window.
fn overlap_start(cursor: usize, end: usize, breaks: &[(usize, u8)], config: &ChunkerConfig) -> usize {
    let desired = end.saturating_sub(config.overlap_chars).max(cursor + 1);

    breaks
        .iter()
        .map(|(offset, _)| *offset)
        .find(|offset| *offset >= desired && *offset < end)
        .unwrap_or(end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(body: &str) -> Document {
        Document {
            id: "test_doc".into(),
            title: "Test Doc".into(),
            category: "General".into(),
            source: "test_doc.md".into(),
            body: body.into(),
        }
    }

    fn reconstruct(chunks: &[Chunk]) -> String {
        let mut rebuilt = chunks[0].text.clone();
        for window in chunks.windows(2) {
            let prev_end = window[0].start + window[0].text.len();
            let overlap = prev_end - window[1].start;
            rebuilt.push_str(&window[1].text[overlap..]);
        }
        rebuilt
    }

    #[test]
    fn empty_document_rejected() {
        let result = chunk_document(&doc("   \n  "), &ChunkerConfig::default());
        assert!(matches!(result, Err(IndexError::EmptyDocument { .. })));
    }

    #[test]
    fn short_document_single_chunk() {
        let chunks = chunk_document(&doc("Refunds settle in 5-10 days."), &ChunkerConfig::default())
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, "test_doc_0");
        assert_eq!(chunks[0].position, 0);
    }

    #[test]
    fn long_document_splits_at_paragraphs() {
        let body = (0..40)
            .map(|i| format!("Paragraph {i} explains one part of the payment lifecycle in detail."))
            .collect::<Vec<_>>()
            .join("\n\n");
        let config = ChunkerConfig {
            target_chars: 300,
            max_chars: 600,
            overlap_chars: 60,
        };
        let chunks = chunk_document(&doc(&body), &config).unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.text.len() <= config.max_chars);
        }
    }

    #[test]
    fn chunk_ids_deterministic_by_position() {
        let body = "word ".repeat(500);
        let config = ChunkerConfig {
            target_chars: 400,
            max_chars: 800,
            overlap_chars: 50,
        };
        let chunks = chunk_document(&doc(&body), &config).unwrap();
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.id, format!("test_doc_{i}"));
            assert_eq!(chunk.position, i);
        }
    }

    #[test]
    fn overlap_carried_between_chunks() {
        let body = "word ".repeat(500);
        let config = ChunkerConfig {
            target_chars: 400,
            max_chars: 800,
            overlap_chars: 100,
        };
        let chunks = chunk_document(&doc(&body), &config).unwrap();
        assert!(chunks.len() > 1);
        let first_end = chunks[0].start + chunks[0].text.len();
        assert!(chunks[1].start < first_end, "second chunk should overlap the first");
    }

    #[test]
    fn reconstruction_is_lossless() {
        let body = (0..30)
            .map(|i| format!("## Section {i}\n\nSome explanation text for section number {i}."))
            .collect::<Vec<_>>()
            .join("\n\n");
        let config = ChunkerConfig {
            target_chars: 250,
            max_chars: 500,
            overlap_chars: 50,
        };
        let chunks = chunk_document(&doc(&body), &config).unwrap();
        assert_eq!(reconstruct(&chunks), normalize(&body));
    }

    #[test]
    fn fenced_code_block_stays_whole() {
        let filler = "Context paragraph before the example code block starts here. ".repeat(8);
        let code = "```rust\nlet client = Client::new(api_key);\nlet refund = client.refunds().create(&params)?;\nprintln!(\"{}\", refund.id);\n```";
        let body = format!("{filler}\n\n{code}\n\nTrailing explanation of the refund call. {filler}");
        let config = ChunkerConfig {
            target_chars: 500,
            max_chars: 1200,
            overlap_chars: 50,
        };
        let chunks = chunk_document(&doc(&body), &config).unwrap();
        let code_chunks: Vec<_> = chunks.iter().filter(|c| c.text.contains("```rust")).collect();
        assert!(
            code_chunks.iter().any(|c| c.text.contains(code)),
            "code block should appear intact in one chunk"
        );
    }

    #[test]
    fn oversized_code_block_splits_at_lines() {
        let mut code = String::from("```\n");
        for i in 0..200 {
            code.push_str(&format!("line_{i} = value_{i}\n"));
        }
        code.push_str("```");
        let config = ChunkerConfig {
            target_chars: 300,
            max_chars: 600,
            overlap_chars: 30,
        };
        let chunks = chunk_document(&doc(&code), &config).unwrap();
        assert!(chunks.len() > 1);
        // Fallback splits land at line breaks, never mid-token.
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(
                chunk.text.ends_with(char::is_whitespace),
                "chunk must end at a separator: {:?}",
                &chunk.text[chunk.text.len().saturating_sub(20)..]
            );
        }
    }

    #[test]
    fn unsplittable_document_rejected() {
        let body = "x".repeat(5000);
        let result = chunk_document(&doc(&body), &ChunkerConfig::default());
        assert!(matches!(result, Err(IndexError::Unsplittable { doc_id }) if doc_id == "test_doc"));
    }

    #[test]
    fn normalize_converts_crlf() {
        assert_eq!(normalize("a\r\nb\r\n"), "a\nb");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn chunks_always_reconstruct_the_body(
                words in proptest::collection::vec("[a-z]{1,12}", 50..400),
                target in 100usize..400,
            ) {
                let body = words.join(" ");
                let config = ChunkerConfig {
                    target_chars: target,
                    max_chars: target * 2,
                    overlap_chars: target / 5,
                };
                let chunks = chunk_document(&doc(&body), &config).unwrap();
                prop_assert_eq!(reconstruct(&chunks), normalize(&body));
            }

            #[test]
            fn positions_are_sequential(
                words in proptest::collection::vec("[a-z]{1,10}", 100..300),
            ) {
                let body = words.join(" ");
                let config = ChunkerConfig {
                    target_chars: 150,
                    max_chars: 300,
                    overlap_chars: 30,
                };
                let chunks = chunk_document(&doc(&body), &config).unwrap();
                for (i, chunk) in chunks.iter().enumerate() {
                    prop_assert_eq!(chunk.position, i);
                }
            }
        }
    }
}
