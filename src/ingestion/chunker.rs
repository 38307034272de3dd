//! Markdown chunking with heading, position and structure tracking

use chrono::Utc;
use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

use crate::types::chunk::{Chunk, ChunkType};
use crate::types::document::FormatCategory;
use crate::types::profile::ChunkingParams;

/// Splits a document's Markdown rendition into size-bounded, heading-aware
/// chunks. Offsets are byte positions into the original text; a chunk's
/// content is the exact slice `text[char_start..char_end]` (tabular chunks
/// additionally repeat the column header).
pub struct Chunker {
    params: ChunkingParams,
}

/// Kind of an atomic piece before grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PieceKind {
    Heading(u8),
    Paragraph,
    Code,
    Table,
}

/// An atomic, already size-bounded span of the source text
#[derive(Debug, Clone)]
struct Piece {
    start: usize,
    end: usize,
    kind: PieceKind,
    /// Nearest heading in effect at this piece (text without markers)
    heading: Option<String>,
    /// Active heading at each level, outermost first
    breadcrumbs: Vec<String>,
}

impl Chunker {
    pub fn new(params: ChunkingParams) -> Self {
        Self { params }
    }

    /// Chunk `text`, dispatching on the source category.
    pub fn chunk(&self, document_id: Uuid, text: &str, category: FormatCategory) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        match category {
            FormatCategory::Tabular => self.chunk_tabular(document_id, text),
            FormatCategory::Presentation => self.chunk_presentation(document_id, text),
            _ => self.assemble(document_id, text, self.split_pieces(text, 0, text.len())),
        }
    }

    // ── Piece construction ───────────────────────────────────────────────

    /// Split `text[from..to]` into contiguous pieces: headings, paragraphs,
    /// fenced code blocks and tables, each no larger than the piece budget.
    fn split_pieces(&self, text: &str, from: usize, to: usize) -> Vec<Piece> {
        let overlap = self.params.overlap_chars.min(self.params.target_chars / 2);
        let piece_budget = (self.params.target_chars - overlap).max(1);

        let mut pieces: Vec<Piece> = Vec::new();
        // breadcrumbs[level-1] = most recent heading at that level
        let mut stack: Vec<Option<String>> = vec![None; 6];
        let mut nearest_heading: Option<String> = None;

        let mut lines = line_spans(text, from, to).into_iter().peekable();

        while let Some((ls, le)) = lines.next() {
            let line = &text[ls..le];
            let trimmed = line.trim_start();

            if trimmed.is_empty() {
                // Blank lines between blocks extend the previous piece so
                // coverage stays contiguous for overlap-removal reassembly.
                if let Some(last) = pieces.last_mut() {
                    last.end = le;
                }
                continue;
            }

            if let Some((level, title)) = parse_heading(trimmed) {
                if (level as usize) <= stack.len() {
                    stack[level as usize - 1] = Some(title.clone());
                    for slot in stack.iter_mut().skip(level as usize) {
                        *slot = None;
                    }
                }
                nearest_heading = Some(title);
                pieces.push(Piece {
                    start: ls,
                    end: le,
                    kind: PieceKind::Heading(level),
                    heading: nearest_heading.clone(),
                    breadcrumbs: self.breadcrumbs(&stack),
                });
                continue;
            }

            let (kind, block_end) = if is_fence(trimmed) {
                // Consume through the closing fence (or end of input).
                let mut end = le;
                for (s, e) in lines.by_ref() {
                    end = e;
                    if is_fence(text[s..e].trim_start()) {
                        break;
                    }
                }
                (PieceKind::Code, end)
            } else if trimmed.starts_with('|') {
                let mut end = le;
                while let Some(&(s, e)) = lines.peek() {
                    if text[s..e].trim_start().starts_with('|') {
                        end = e;
                        lines.next();
                    } else {
                        break;
                    }
                }
                (PieceKind::Table, end)
            } else {
                // Paragraph: consume until a blank line or structural marker.
                let mut end = le;
                while let Some(&(s, e)) = lines.peek() {
                    let next = text[s..e].trim_start();
                    if next.is_empty()
                        || parse_heading(next).is_some()
                        || is_fence(next)
                        || next.starts_with('|')
                    {
                        break;
                    }
                    end = e;
                    lines.next();
                }
                (PieceKind::Paragraph, end)
            };

            for (ps, pe) in bounded_ranges(text, ls, block_end, piece_budget) {
                pieces.push(Piece {
                    start: ps,
                    end: pe,
                    kind,
                    heading: nearest_heading.clone(),
                    breadcrumbs: self.breadcrumbs(&stack),
                });
            }
        }

        pieces
    }

    fn breadcrumbs(&self, stack: &[Option<String>]) -> Vec<String> {
        stack
            .iter()
            .take(self.params.header_levels as usize)
            .filter_map(|s| s.clone())
            .collect()
    }

    // ── Grouping ─────────────────────────────────────────────────────────

    /// Greedily group pieces into chunks of at most `target_chars`, breaking
    /// at the most recent heading inside an overflowing group when one
    /// exists, and carrying `overlap_chars` of tail into the next chunk.
    fn assemble(&self, document_id: Uuid, text: &str, pieces: Vec<Piece>) -> Vec<Chunk> {
        if pieces.is_empty() {
            return Vec::new();
        }

        let target = self.params.target_chars.max(1);
        let overlap = self.params.overlap_chars.min(target / 2);

        let mut chunks: Vec<Chunk> = Vec::new();
        let mut group: Vec<Piece> = Vec::new();
        // Start of the chunk text, including any overlap carried backwards.
        let mut chunk_start = pieces[0].start;

        let mut queue = std::collections::VecDeque::from(pieces);

        while let Some(piece) = queue.pop_front() {
            // Flush until the piece fits; a carried tail can overflow again.
            while !group.is_empty() && piece.end.saturating_sub(chunk_start) > target {
                // Prefer a heading boundary inside the group over the raw
                // piece boundary: trailing pieces move to the next chunk.
                let split_at = group
                    .iter()
                    .rposition(|p| matches!(p.kind, PieceKind::Heading(l) if l <= self.params.header_levels))
                    .filter(|&i| i > 0);

                let carried: Vec<Piece> = match split_at {
                    Some(i) => group.split_off(i),
                    None => Vec::new(),
                };

                let chunk_end = group.last().map(|p| p.end).unwrap_or(piece.start);
                chunks.push(self.emit(document_id, text, chunk_start, chunk_end, &group));

                // Next chunk begins at the carried pieces (or this piece),
                // pulled back by the overlap window but never before the
                // chunk just emitted (starts stay non-decreasing).
                let next_content_start = carried.first().map(|p| p.start).unwrap_or(piece.start);
                chunk_start =
                    overlap_start(text, next_content_start, chunk_end, overlap).max(chunk_start);

                group = carried;
            }

            group.push(piece);
        }

        if !group.is_empty() {
            let chunk_end = group.last().map(|p| p.end).unwrap_or(chunk_start);
            chunks.push(self.emit(document_id, text, chunk_start, chunk_end, &group));
        }

        for (i, c) in chunks.iter_mut().enumerate() {
            c.chunk_index = i as u32;
        }
        chunks
    }

    fn emit(
        &self,
        document_id: Uuid,
        text: &str,
        start: usize,
        end: usize,
        group: &[Piece],
    ) -> Chunk {
        let content = text[start..end].to_string();
        let first = group.first();

        let chunk_type = infer_chunk_type(group);
        let heading = first.and_then(|p| p.heading.clone());
        let breadcrumbs = first.map(|p| p.breadcrumbs.clone()).unwrap_or_default();

        Chunk {
            id: Uuid::new_v4(),
            document_id,
            chunk_index: 0, // assigned after assembly
            token_count: estimate_tokens(&content),
            content,
            char_start: start,
            char_end: end,
            heading,
            breadcrumbs,
            page: None,
            quality_score: 1.0,
            quality_flags: Vec::new(),
            chunk_type,
            embedding: Vec::new(),
            sparse_embedding: None,
            created_at: Utc::now(),
        }
    }

    // ── Tabular sources ──────────────────────────────────────────────────

    /// Chunk a Markdown table by row count, repeating the column header at
    /// the top of every chunk.
    fn chunk_tabular(&self, document_id: Uuid, text: &str) -> Vec<Chunk> {
        let rows_per_chunk = self.params.tabular_rows_per_chunk.max(1);
        let spans = line_spans(text, 0, text.len());

        // Header = first table line plus its separator line when present.
        let mut header_lines: Vec<(usize, usize)> = Vec::new();
        let mut data_lines: Vec<(usize, usize)> = Vec::new();
        for &(s, e) in &spans {
            let line = text[s..e].trim();
            if line.is_empty() {
                continue;
            }
            if header_lines.is_empty() {
                header_lines.push((s, e));
            } else if header_lines.len() == 1 && is_table_separator(line) {
                header_lines.push((s, e));
            } else {
                data_lines.push((s, e));
            }
        }

        if data_lines.is_empty() {
            // Header-only (or non-tabular) input falls back to generic chunking.
            return self.assemble(document_id, text, self.split_pieces(text, 0, text.len()));
        }

        let header: String = header_lines
            .iter()
            .map(|&(s, e)| text[s..e].trim_end_matches(['\r', '\n']))
            .collect::<Vec<_>>()
            .join("\n");

        let mut chunks = Vec::new();
        for (i, rows) in data_lines.chunks(rows_per_chunk).enumerate() {
            let start = rows[0].0;
            let end = rows[rows.len() - 1].1;
            let body = &text[start..end];
            let content = format!("{}\n{}", header, body);

            chunks.push(Chunk {
                id: Uuid::new_v4(),
                document_id,
                chunk_index: i as u32,
                token_count: estimate_tokens(&content),
                content,
                char_start: start,
                char_end: end,
                heading: None,
                breadcrumbs: Vec::new(),
                page: None,
                quality_score: 1.0,
                quality_flags: Vec::new(),
                chunk_type: ChunkType::Table,
                embedding: Vec::new(),
                sparse_embedding: None,
                created_at: Utc::now(),
            });
        }
        chunks
    }

    // ── Presentation sources ─────────────────────────────────────────────

    /// Chunk slide-structured Markdown: slides are separated by `---` rules;
    /// adjacent slides below the minimum merge into one chunk.
    fn chunk_presentation(&self, document_id: Uuid, text: &str) -> Vec<Chunk> {
        let min = self.params.presentation_min_chunk_chars;
        let spans = line_spans(text, 0, text.len());

        // Slide boundaries at horizontal rules.
        let mut slide_ranges: Vec<(usize, usize)> = Vec::new();
        let mut slide_start = 0usize;
        for &(s, e) in &spans {
            if is_hr(text[s..e].trim()) {
                if s > slide_start {
                    slide_ranges.push((slide_start, s));
                }
                slide_start = e;
            }
        }
        if slide_start < text.len() {
            slide_ranges.push((slide_start, text.len()));
        }
        slide_ranges.retain(|&(s, e)| !text[s..e].trim().is_empty());

        // Merge adjacent small slides.
        let mut merged: Vec<(usize, usize)> = Vec::new();
        for (s, e) in slide_ranges {
            match merged.last_mut() {
                Some(last) if (last.1 - last.0) < min => last.1 = e,
                _ => merged.push((s, e)),
            }
        }

        let mut chunks = Vec::new();
        for (s, e) in merged {
            let pieces = self.split_pieces(text, s, e);
            chunks.extend(self.assemble(document_id, text, pieces));
        }
        for (i, c) in chunks.iter_mut().enumerate() {
            c.chunk_index = i as u32;
        }
        chunks
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────

/// Byte spans of each line, including its terminator.
fn line_spans(text: &str, from: usize, to: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = from;
    let bytes = text.as_bytes();
    for i in from..to {
        if bytes[i] == b'\n' {
            spans.push((start, i + 1));
            start = i + 1;
        }
    }
    if start < to {
        spans.push((start, to));
    }
    spans
}

/// Parse an ATX heading, returning (level, title).
fn parse_heading(line: &str) -> Option<(u8, String)> {
    let hashes = line.bytes().take_while(|&b| b == b'#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.starts_with(' ') && !rest.starts_with('\t') {
        return None;
    }
    let title = rest.trim().trim_end_matches('#').trim();
    if title.is_empty() {
        return None;
    }
    Some((hashes as u8, title.to_string()))
}

fn is_fence(line: &str) -> bool {
    line.starts_with("```") || line.starts_with("~~~")
}

fn is_hr(line: &str) -> bool {
    line.len() >= 3 && (line.chars().all(|c| c == '-') || line.chars().all(|c| c == '*'))
}

fn is_table_separator(line: &str) -> bool {
    !line.is_empty()
        && line
            .chars()
            .all(|c| matches!(c, '|' | '-' | ':' | ' '))
        && line.contains('-')
}

/// Split `text[from..to]` into ranges of at most `max` bytes, preferring
/// sentence boundaries, then word boundaries, then grapheme boundaries.
fn bounded_ranges(text: &str, from: usize, to: usize, max: usize) -> Vec<(usize, usize)> {
    if to.saturating_sub(from) <= max {
        return vec![(from, to)];
    }

    let slice = &text[from..to];
    let sentence_bounds: Vec<(usize, &str)> = slice.split_sentence_bound_indices().collect();
    if sentence_bounds.len() > 1 {
        return pack_segments(from, to, max, sentence_bounds.iter().map(|&(o, s)| (o, s.len())), |f, t| {
            bounded_ranges(text, f, t, max)
        });
    }

    let word_bounds: Vec<(usize, &str)> = slice.split_word_bound_indices().collect();
    if word_bounds.len() > 1 {
        return pack_segments(from, to, max, word_bounds.iter().map(|&(o, s)| (o, s.len())), |f, t| {
            bounded_ranges(text, f, t, max)
        });
    }

    // Single unbreakable token: cut at grapheme boundaries.
    let mut ranges = Vec::new();
    let mut seg_start = from;
    let mut last = from;
    for (offset, g) in slice.grapheme_indices(true) {
        let g_end = from + offset + g.len();
        if g_end - seg_start > max && last > seg_start {
            ranges.push((seg_start, last));
            seg_start = last;
        }
        last = g_end;
    }
    if seg_start < to {
        ranges.push((seg_start, to));
    }
    ranges
}

/// Pack (offset, len) segments into ranges of at most `max`, recursing into
/// `split_large` for any single segment that is itself oversized.
fn pack_segments<I, F>(from: usize, to: usize, max: usize, segments: I, split_large: F) -> Vec<(usize, usize)>
where
    I: Iterator<Item = (usize, usize)>,
    F: Fn(usize, usize) -> Vec<(usize, usize)>,
{
    let mut ranges = Vec::new();
    let mut seg_start = from;
    let mut cursor = from;

    for (offset, len) in segments {
        let abs_start = from + offset;
        let abs_end = abs_start + len;

        if len > max {
            if cursor > seg_start {
                ranges.push((seg_start, cursor));
            }
            ranges.extend(split_large(abs_start, abs_end));
            seg_start = abs_end;
            cursor = abs_end;
            continue;
        }

        if abs_end - seg_start > max && cursor > seg_start {
            ranges.push((seg_start, cursor));
            seg_start = cursor;
        }
        cursor = abs_end;
    }

    if seg_start < to {
        ranges.push((seg_start, to));
    }
    ranges
}

/// Pull the next chunk's start back into the previous chunk's tail by up to
/// `overlap` bytes, snapping to a character boundary and then forward past a
/// partial word.
fn overlap_start(text: &str, content_start: usize, prev_end: usize, overlap: usize) -> usize {
    if overlap == 0 || content_start == 0 {
        return content_start;
    }
    let mut pos = content_start.saturating_sub(overlap);
    while pos < content_start && !text.is_char_boundary(pos) {
        pos += 1;
    }
    // Avoid starting mid-word: advance past the first whitespace run.
    if pos > 0 && !text.as_bytes()[pos - 1].is_ascii_whitespace() {
        let window_end = content_start.min(prev_end);
        if let Some(ws) = text[pos..window_end].find(char::is_whitespace) {
            let mut p = pos + ws;
            while p < window_end && text.as_bytes()[p].is_ascii_whitespace() {
                p += 1;
            }
            pos = p;
        }
    }
    pos.min(content_start)
}

fn infer_chunk_type(group: &[Piece]) -> ChunkType {
    if group
        .iter()
        .all(|p| matches!(p.kind, PieceKind::Heading(_)))
    {
        return ChunkType::Heading;
    }
    match group
        .iter()
        .find(|p| !matches!(p.kind, PieceKind::Heading(_)))
        .map(|p| p.kind)
    {
        Some(PieceKind::Code) => ChunkType::Code,
        Some(PieceKind::Table) => ChunkType::Table,
        _ => ChunkType::Text,
    }
}

fn estimate_tokens(content: &str) -> u32 {
    (content.len() as u32 / 4).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::profile::ChunkingParams;

    fn params(target: usize, overlap: usize) -> ChunkingParams {
        ChunkingParams {
            target_chars: target,
            overlap_chars: overlap,
            header_levels: 3,
            presentation_min_chunk_chars: 200,
            tabular_rows_per_chunk: 2,
        }
    }

    fn doc() -> Uuid {
        Uuid::new_v4()
    }

    #[test]
    fn blank_input_yields_no_chunks() {
        let c = Chunker::new(params(1000, 200));
        assert!(c.chunk(doc(), "   \n\n  ", FormatCategory::Raw).is_empty());
    }

    #[test]
    fn short_document_is_a_single_chunk_with_heading() {
        let c = Chunker::new(params(1000, 200));
        let text = "# Intro\nSome introduction text that explains the topic.\n\n## Detail\nDeeper details follow here with more words.\n";
        let chunks = c.chunk(doc(), text, FormatCategory::Raw);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].heading.as_deref(), Some("Intro"));
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].char_start, 0);
        assert_eq!(chunks[0].char_end, text.len());
    }

    #[test]
    fn oversized_input_always_splits() {
        let c = Chunker::new(params(200, 40));
        let text = "word ".repeat(200); // 1000 chars, no structure
        let chunks = c.chunk(doc(), &text, FormatCategory::Raw);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.content.len() <= 200, "chunk too large: {}", chunk.content.len());
        }
    }

    #[test]
    fn positions_are_monotonic_and_in_bounds() {
        let c = Chunker::new(params(150, 30));
        let text = format!(
            "# One\n{}\n## Two\n{}\n## Three\n{}\n",
            "alpha beta gamma. ".repeat(20),
            "delta epsilon zeta. ".repeat(20),
            "eta theta iota. ".repeat(20)
        );
        let chunks = c.chunk(doc(), &text, FormatCategory::Document);
        assert!(chunks.len() > 2);
        let mut prev_start = 0usize;
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i as u32);
            assert!(chunk.char_start < chunk.char_end);
            assert!(chunk.char_end <= text.len());
            assert!(chunk.char_start >= prev_start, "starts must not decrease");
            prev_start = chunk.char_start;
            assert_eq!(&text[chunk.char_start..chunk.char_end], chunk.content);
        }
    }

    #[test]
    fn overlap_removed_concatenation_restores_source() {
        let c = Chunker::new(params(120, 25));
        let text = "The first sentence is here. Another sentence follows it. \
                    A third one extends the paragraph further. Then a fourth one. \
                    And a fifth sentence to push past the budget. Plus a sixth one for measure.";
        let chunks = c.chunk(doc(), text, FormatCategory::Raw);
        assert!(chunks.len() > 1);

        let mut rebuilt = String::new();
        let mut covered = 0usize;
        for chunk in &chunks {
            let skip = covered.saturating_sub(chunk.char_start);
            rebuilt.push_str(&chunk.content[skip..]);
            covered = chunk.char_end;
        }
        assert_eq!(rebuilt.trim(), text.trim());
    }

    #[test]
    fn breadcrumbs_track_the_heading_stack() {
        let c = Chunker::new(params(80, 10));
        let text = format!(
            "# Guide\n## Setup\n{}\n## Usage\n{}\n",
            "install the binary and configure paths. ".repeat(6),
            "run the command with flags. ".repeat(6)
        );
        let chunks = c.chunk(doc(), &text, FormatCategory::Document);
        let usage_chunk = chunks
            .iter()
            .find(|ch| ch.heading.as_deref() == Some("Usage"))
            .expect("a chunk under Usage");
        assert_eq!(usage_chunk.breadcrumbs, vec!["Guide".to_string(), "Usage".to_string()]);
    }

    #[test]
    fn code_fences_stay_whole_and_typed() {
        let c = Chunker::new(params(500, 50));
        let text = "Intro paragraph.\n\n```rust\nfn main() {\n    println!(\"hi\");\n}\n```\n";
        let chunks = c.chunk(doc(), text, FormatCategory::Raw);
        assert_eq!(chunks.len(), 1);
        // Mixed content: first body piece decides the type.
        assert_eq!(chunks[0].chunk_type, ChunkType::Text);

        let code_only = "```rust\nfn main() {}\n```\n";
        let chunks = c.chunk(doc(), code_only, FormatCategory::Raw);
        assert_eq!(chunks[0].chunk_type, ChunkType::Code);
    }

    #[test]
    fn tabular_repeats_header_every_chunk() {
        let c = Chunker::new(params(1000, 100));
        let text = "| id | name |\n| --- | --- |\n| 1 | a |\n| 2 | b |\n| 3 | c |\n| 4 | d |\n| 5 | e |\n";
        let chunks = c.chunk(doc(), text, FormatCategory::Tabular);
        // 5 data rows at 2 rows per chunk -> 3 chunks.
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert!(chunk.content.starts_with("| id | name |\n| --- | --- |"));
            assert_eq!(chunk.chunk_type, ChunkType::Table);
        }
        assert!(chunks[2].content.ends_with("| 5 | e |\n"));
    }

    #[test]
    fn presentation_merges_small_slides() {
        let c = Chunker::new(params(1000, 100));
        let text = "# Slide one\nshort\n\n---\n\n# Slide two\nalso short\n\n---\n\n# Slide three\ntiny\n";
        let chunks = c.chunk(doc(), text, FormatCategory::Presentation);
        // All slides are below the 200-char minimum, so they merge.
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn grapheme_safe_splitting_of_unbreakable_runs() {
        let c = Chunker::new(params(40, 0));
        // One long token with multi-byte graphemes; must never split mid-char.
        let text = "é".repeat(120);
        let chunks = c.chunk(doc(), &text, FormatCategory::Raw);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert_eq!(&text[chunk.char_start..chunk.char_end], chunk.content);
        }
    }
}
