//! Content admission checks and per-chunk quality scoring

use crate::types::chunk::{Chunk, QualityFlag};
use crate::types::job::fail_codes;
use crate::types::profile::QualityParams;

/// Assessment of a full text blob before chunking
#[derive(Debug, Clone)]
pub struct TextAssessment {
    pub passed: bool,
    /// Rejection code when `passed` is false
    pub reason: Option<&'static str>,
    pub warnings: Vec<&'static str>,
    pub noise_ratio: f32,
    pub content_length: usize,
}

/// Rejects or flags content below length or above noise thresholds.
pub struct QualityGate {
    params: QualityParams,
}

impl QualityGate {
    pub fn new(params: QualityParams) -> Self {
        Self { params }
    }

    /// Gate a full text blob. Rules apply in order: length, hard noise
    /// ceiling, then the warn threshold.
    pub fn assess_text(&self, text: &str) -> TextAssessment {
        let trimmed = text.trim();
        let content_length = trimmed.chars().count();
        let noise_ratio = noise_ratio(trimmed);

        if content_length < self.params.min_chars {
            return TextAssessment {
                passed: false,
                reason: Some(fail_codes::TEXT_TOO_SHORT),
                warnings: Vec::new(),
                noise_ratio,
                content_length,
            };
        }

        if noise_ratio > self.params.noise_reject {
            return TextAssessment {
                passed: false,
                reason: Some(fail_codes::EXCESSIVE_NOISE),
                warnings: Vec::new(),
                noise_ratio,
                content_length,
            };
        }

        let mut warnings = Vec::new();
        if noise_ratio > self.params.noise_warn {
            warnings.push("HIGH_NOISE_RATIO");
        }

        TextAssessment {
            passed: true,
            reason: None,
            warnings,
            noise_ratio,
            content_length,
        }
    }

    /// Score a single chunk in place: attach flags and the resulting score.
    pub fn score_chunk(&self, chunk: &mut Chunk) {
        let mut flags = Vec::new();
        let trimmed = chunk.content.trim_end();

        if !trimmed.is_empty() && !ends_with_terminal_punctuation(trimmed) {
            flags.push(QualityFlag::Fragment);
        }
        if chunk.breadcrumbs.is_empty() {
            flags.push(QualityFlag::NoContext);
        }
        if chunk.content.trim().chars().count() < self.params.min_chars {
            flags.push(QualityFlag::TooShort);
        }
        if noise_ratio(&chunk.content) > self.params.noise_warn {
            flags.push(QualityFlag::Noisy);
        }

        chunk.quality_score =
            (1.0 - self.params.penalty_per_flag * flags.len() as f32).max(0.0);
        chunk.quality_flags = flags;
    }

    /// Score every chunk of a document.
    pub fn score_chunks(&self, chunks: &mut [Chunk]) {
        for chunk in chunks {
            self.score_chunk(chunk);
        }
    }
}

/// Non-alphanumeric, non-whitespace characters over total length.
fn noise_ratio(text: &str) -> f32 {
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }
    let noise = text
        .chars()
        .filter(|c| !c.is_alphanumeric() && !c.is_whitespace())
        .count();
    noise as f32 / total as f32
}

fn ends_with_terminal_punctuation(text: &str) -> bool {
    // Closing quotes/brackets after the terminal mark still count.
    let tail: String = text
        .chars()
        .rev()
        .take(3)
        .collect();
    tail.chars().any(|c| matches!(c, '.' | '!' | '?' | ':' | ';' | '|' | '`'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::profile::QualityParams;
    use chrono::Utc;
    use uuid::Uuid;

    fn gate() -> QualityGate {
        QualityGate::new(QualityParams {
            min_chars: 50,
            max_chars: 8_000,
            noise_warn: 0.5,
            noise_reject: 0.8,
            penalty_per_flag: 0.25,
            auto_fix_enabled: false,
            auto_fix_max_passes: 1,
        })
    }

    fn chunk(content: &str, breadcrumbs: Vec<String>) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            chunk_index: 0,
            content: content.to_string(),
            char_start: 0,
            char_end: content.len(),
            heading: None,
            breadcrumbs,
            page: None,
            quality_score: 1.0,
            quality_flags: Vec::new(),
            chunk_type: crate::types::chunk::ChunkType::Text,
            token_count: 1,
            embedding: Vec::new(),
            sparse_embedding: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn short_text_is_rejected_first() {
        let a = gate().assess_text("tiny");
        assert!(!a.passed);
        assert_eq!(a.reason, Some("TEXT_TOO_SHORT"));
    }

    #[test]
    fn noisy_text_is_rejected_above_ceiling() {
        let noisy = "#$%^&*@!~".repeat(20);
        let a = gate().assess_text(&noisy);
        assert!(!a.passed);
        assert_eq!(a.reason, Some("EXCESSIVE_NOISE"));
        assert!(a.noise_ratio > 0.8);
    }

    #[test]
    fn moderately_noisy_text_passes_with_warning() {
        // Roughly 60% symbols: above warn (0.5), below reject (0.8).
        let mixed: String = "ab##$ #@%".repeat(20);
        let a = gate().assess_text(&mixed);
        assert!(a.passed, "noise {} should pass", a.noise_ratio);
        assert_eq!(a.warnings, vec!["HIGH_NOISE_RATIO"]);
    }

    #[test]
    fn clean_text_passes_without_warnings() {
        let a = gate().assess_text(&"a clear sentence with ordinary words. ".repeat(3));
        assert!(a.passed);
        assert!(a.warnings.is_empty());
    }

    #[test]
    fn chunk_score_decreases_per_flag() {
        let g = gate();

        // Fragment + no context + too short -> three flags.
        let mut c = chunk("ends mid sentence without", Vec::new());
        g.score_chunk(&mut c);
        assert_eq!(c.quality_flags.len(), 3);
        assert!((c.quality_score - 0.25).abs() < f32::EPSILON);

        // Healthy chunk: long enough, context, terminal punctuation.
        let long = "A well formed paragraph that carries real content and ends properly. "
            .repeat(2);
        let mut c = chunk(&long, vec!["Guide".into()]);
        g.score_chunk(&mut c);
        assert!(c.quality_flags.is_empty());
        assert!((c.quality_score - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn score_never_goes_negative() {
        let mut g = gate();
        g.params.penalty_per_flag = 0.5;
        let mut c = chunk("@@@", Vec::new());
        g.score_chunk(&mut c);
        assert!(c.quality_score >= 0.0);
    }
}
