//! Line-boundary text chunker with overlap.
//!
//! Splits file content into [`Chunk`]s of at most `max_chars` characters.
//! Consecutive chunks overlap by `overlap_chars` characters, and a chunk
//! prefers to end just after a newline rather than mid-line.
//!
//! Each chunk receives a content-addressed id derived from the owning
//! file's hash and the chunk index, so re-chunking identical content
//! always yields identical ids.

use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};
use crate::models::Chunk;

/// A chunk's untrimmed character range plus its trimmed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Split `content` into overlapping spans.
///
/// Offsets and lengths are measured in characters, not bytes. Returns
/// `InvalidArgument` unless `max_chars > 0` and `overlap_chars < max_chars`,
/// since the window could otherwise never advance. Zero overlap is allowed.
///
/// A newline break is only taken when it still moves the next window
/// forward by at least half of `max_chars - overlap_chars`; that bounds
/// the chunk count at twice the boundary-free count.
pub fn chunk_spans(content: &str, max_chars: usize, overlap_chars: usize) -> Result<Vec<ChunkSpan>> {
    if max_chars == 0 {
        return Err(CoreError::InvalidArgument(
            "chunk max size must be > 0".to_string(),
        ));
    }
    if overlap_chars >= max_chars {
        return Err(CoreError::InvalidArgument(format!(
            "chunk overlap ({}) must be smaller than max size ({})",
            overlap_chars, max_chars
        )));
    }

    // Byte offset of every char boundary, plus the end of the string.
    let bounds: Vec<usize> = content
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(content.len()))
        .collect();
    let len = bounds.len() - 1;
    let slice = |s: usize, e: usize| &content[bounds[s]..bounds[e]];

    if len <= max_chars {
        let text = content.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        return Ok(vec![ChunkSpan {
            start: 0,
            end: len,
            text: text.to_string(),
        }]);
    }

    let min_stride = (max_chars - overlap_chars).div_ceil(2);
    let mut spans = Vec::new();
    let mut start = 0usize;

    while start < len {
        let mut end = start + max_chars;

        if end < len {
            if let Some(byte_pos) = slice(start, end).rfind('\n') {
                let newline = bounds
                    .binary_search(&(bounds[start] + byte_pos))
                    .unwrap_or_else(|i| i);
                if newline > start && newline + 1 >= start + overlap_chars + min_stride {
                    end = newline + 1;
                }
            }
        }

        let stop = end.min(len);
        let text = slice(start, stop).trim();
        if !text.is_empty() {
            spans.push(ChunkSpan {
                start,
                end: stop,
                text: text.to_string(),
            });
        }

        start = end - overlap_chars;
    }

    Ok(spans)
}

/// Chunk one file version. Indices are contiguous starting at 0.
pub fn chunk_file(
    file_hash: &str,
    content: &str,
    max_chars: usize,
    overlap_chars: usize,
) -> Result<Vec<Chunk>> {
    let spans = chunk_spans(content, max_chars, overlap_chars)?;
    Ok(spans
        .into_iter()
        .enumerate()
        .map(|(i, span)| Chunk {
            id: chunk_id(file_hash, i as i64),
            file_hash: file_hash.to_string(),
            chunk_index: i as i64,
            text: span.text,
            start: span.start,
            end: span.end,
        })
        .collect())
}

/// Content-addressed chunk id: SHA-256 of `"{file_hash}:{index}"`.
pub fn chunk_id(file_hash: &str, index: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_hash.as_bytes());
    hasher.update(b":");
    hasher.update(index.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_small_text_single_chunk() {
        let spans = chunk_spans("Hello, world!", 1000, 200).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "Hello, world!");
        assert_eq!((spans[0].start, spans[0].end), (0, 13));
    }

    #[test]
    fn test_empty_and_blank_text() {
        assert!(chunk_spans("", 1000, 200).unwrap().is_empty());
        assert!(chunk_spans("  \n\t \n", 1000, 200).unwrap().is_empty());
    }

    #[test]
    fn test_overlap_not_smaller_than_max_rejected() {
        assert!(matches!(
            chunk_spans("abc", 10, 10),
            Err(CoreError::InvalidArgument(_))
        ));
        assert!(matches!(
            chunk_spans("abc", 10, 50),
            Err(CoreError::InvalidArgument(_))
        ));
        assert!(matches!(
            chunk_spans("abc", 0, 0),
            Err(CoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_zero_overlap_tiles_content() {
        let spans = chunk_spans(&"x".repeat(25), 10, 0).unwrap();
        let bounds: Vec<(usize, usize)> = spans.iter().map(|s| (s.start, s.end)).collect();
        assert_eq!(bounds, vec![(0, 10), (10, 20), (20, 25)]);
    }

    #[test]
    fn test_prefers_line_boundary() {
        // 30 lines of 9 chars + newline = 300 chars
        let text = (0..30)
            .map(|i| format!("line {:04}", i))
            .collect::<Vec<_>>()
            .join("\n");
        let spans = chunk_spans(&text, 95, 10).unwrap();
        assert!(spans.len() > 1);
        // Every chunk but the last ends right after a newline
        for span in &spans[..spans.len() - 1] {
            assert!(span.text.ends_with(|c: char| c.is_ascii_digit()));
            let raw: String = text.chars().skip(span.start).take(span.end - span.start).collect();
            assert!(raw.ends_with('\n'), "chunk did not end on a line break: {:?}", raw);
        }
    }

    #[test]
    fn test_no_boundary_count_matches_stride() {
        let text = "x".repeat(2500);
        let spans = chunk_spans(&text, 1000, 200).unwrap();
        // ceil(2500 / 800) = 4
        assert_eq!(spans.len(), 4);
        assert_eq!(spans[0].start, 0);
        assert_eq!(spans[1].start, 800);
        assert_eq!(spans[2].start, 1600);
    }

    #[test]
    fn test_repeated_function_definitions_split() {
        let text = "def foo():\n    pass\n".repeat(100);
        let chunks = chunk_file("abc", &text, 1000, 200).unwrap();
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert!(c.end - c.start <= 1000);
            assert!(c.text.starts_with("def foo()"));
        }
    }

    #[test]
    fn test_multibyte_content_counts_characters() {
        let text = "é".repeat(300);
        let spans = chunk_spans(&text, 100, 10).unwrap();
        for span in &spans {
            assert!(span.text.chars().count() <= 100);
        }
        assert_eq!(spans.last().map(|s| s.end), Some(300));
    }

    #[test]
    fn test_chunk_ids_are_content_addressed() {
        let text = "Alpha\nBeta\nGamma\nDelta\n".repeat(20);
        let c1 = chunk_file("hash-a", &text, 50, 10).unwrap();
        let c2 = chunk_file("hash-a", &text, 50, 10).unwrap();
        let c3 = chunk_file("hash-b", &text, 50, 10).unwrap();
        assert_eq!(c1, c2);
        assert_ne!(c1[0].id, c3[0].id);
        assert_eq!(c1[0].id, chunk_id("hash-a", 0));
        assert_eq!(c1[0].id.len(), 64);
    }

    proptest! {
        #[test]
        fn prop_chunks_cover_content(
            content in "[a-z \n]{0,1500}",
            max in 10usize..300,
            overlap_pct in 0usize..100,
        ) {
            let overlap = max * overlap_pct / 100;
            let spans = chunk_spans(&content, max, overlap).unwrap();
            let chars: Vec<char> = content.chars().collect();
            let is_blank = |s: usize, e: usize| chars[s..e].iter().all(|c| c.is_whitespace());

            let mut covered_to = 0usize;
            for span in &spans {
                prop_assert!(span.end - span.start <= max);
                if span.start > covered_to {
                    prop_assert!(is_blank(covered_to, span.start));
                }
                let raw: String = chars[span.start..span.end].iter().collect();
                prop_assert_eq!(raw.trim(), span.text.as_str());
                covered_to = covered_to.max(span.end);
            }
            prop_assert!(is_blank(covered_to, chars.len()));
        }

        #[test]
        fn prop_chunk_count_is_bounded(
            content in "[a-z\n]{1,3000}",
            max in 10usize..300,
            overlap_pct in 0usize..100,
        ) {
            let overlap = max * overlap_pct / 100;
            let len = content.chars().count();
            let spans = chunk_spans(&content, max, overlap).unwrap();
            if len > max {
                let bound = len.div_ceil(max - overlap);
                prop_assert!(spans.len() <= 2 * bound, "{} chunks > 2 * {}", spans.len(), bound);
            }
        }
    }
}
