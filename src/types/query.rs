//! Search request types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Retrieval mode
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Dense retriever only; results carry raw cosine similarity
    Dense,
    /// Dense + lexical retrievers fused with RRF
    #[default]
    Hybrid,
}

/// Candidate scoping filter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<Uuid>,
}

/// A search request
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    #[serde(rename = "queryText")]
    pub query_text: String,
    #[serde(rename = "topK", default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub mode: SearchMode,
    /// Fusion weight toward the dense retriever, in [0, 1]
    #[serde(default)]
    pub alpha: Option<f32>,
    #[serde(default)]
    pub filter: Option<SearchFilter>,
}

fn default_top_k() -> usize {
    5
}

impl SearchRequest {
    pub fn validate(&self) -> Result<()> {
        if self.query_text.trim().is_empty() {
            return Err(Error::Validation("queryText must not be empty".into()));
        }
        if self.top_k == 0 || self.top_k > 100 {
            return Err(Error::Validation(format!(
                "topK must be in 1..=100, got {}",
                self.top_k
            )));
        }
        if let Some(alpha) = self.alpha {
            if !(0.0..=1.0).contains(&alpha) {
                return Err(Error::Validation(format!(
                    "alpha must be in [0, 1], got {}",
                    alpha
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(top_k: usize, alpha: Option<f32>) -> SearchRequest {
        SearchRequest {
            query_text: "intro".into(),
            top_k,
            mode: SearchMode::Hybrid,
            alpha,
            filter: None,
        }
    }

    #[test]
    fn top_k_bounds() {
        assert!(req(1, None).validate().is_ok());
        assert!(req(100, None).validate().is_ok());
        assert!(req(0, None).validate().is_err());
        assert!(req(101, None).validate().is_err());
    }

    #[test]
    fn alpha_bounds() {
        assert!(req(5, Some(0.0)).validate().is_ok());
        assert!(req(5, Some(1.0)).validate().is_ok());
        assert!(req(5, Some(1.5)).validate().is_err());
    }

    #[test]
    fn defaults_from_json() {
        let r: SearchRequest = serde_json::from_str(r#"{"queryText": "hello"}"#).unwrap();
        assert_eq!(r.top_k, 5);
        assert_eq!(r.mode, SearchMode::Hybrid);
        assert!(r.alpha.is_none());
    }
}
