//! Decision model returned to API callers.

use crate::processing::ChunkId;
use crate::query::{EntityValue, Slot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Closed set of decision outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionLabel {
    /// The claim or request is allowed by the cited clauses.
    Approved,
    /// The claim or request is refused by the cited clauses.
    Rejected,
    /// The question asks for information rather than a yes/no outcome.
    InfoOnly,
    /// No retrieved passage supports an answer.
    InsufficientEvidence,
}

impl DecisionLabel {
    /// Canonical wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionLabel::Approved => "APPROVED",
            DecisionLabel::Rejected => "REJECTED",
            DecisionLabel::InfoOnly => "INFO_ONLY",
            DecisionLabel::InsufficientEvidence => "INSUFFICIENT_EVIDENCE",
        }
    }

    /// Lenient parse of a model-reported label.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_uppercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "APPROVED" | "APPROVE" | "COVERED" | "YES" | "ACCEPTED" => Some(Self::Approved),
            "REJECTED" | "REJECT" | "DENIED" | "NOT_COVERED" | "NO" | "EXCLUDED" => {
                Some(Self::Rejected)
            }
            "INFO_ONLY" | "INFO" | "INFORMATION" | "INFORMATIONAL" => Some(Self::InfoOnly),
            "INSUFFICIENT_EVIDENCE" | "INSUFFICIENT" | "UNKNOWN" | "NEEDS_REVIEW" => {
                Some(Self::InsufficientEvidence)
            }
            _ => None,
        }
    }
}

impl fmt::Display for DecisionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cited passage backing a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClauseReference {
    /// Chunk the passage came from.
    pub chunk_id: ChunkId,
    /// Leading part of the chunk text.
    pub excerpt: String,
    /// First page the chunk touches, when known.
    pub page: Option<u32>,
    /// Fused retrieval score of the chunk.
    pub fused_score: f32,
}

/// Structured answer to one question.
///
/// `supporting_chunk_ids` is non-empty unless the label is
/// [`DecisionLabel::InsufficientEvidence`], and only ever names chunks supplied to synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Question as asked.
    pub question: String,
    /// Human-readable answer.
    pub answer_text: String,
    /// Outcome label.
    pub decision_label: DecisionLabel,
    /// Monetary amount, when the answer carries one.
    pub amount: Option<f64>,
    /// Chunks backing the answer, in rank order.
    pub supporting_chunk_ids: Vec<ChunkId>,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    /// Excerpts of the supporting chunks.
    pub referenced_clauses: Vec<ClauseReference>,
    /// Slots extracted from the question.
    pub entities: BTreeMap<Slot, EntityValue>,
}

impl Decision {
    /// Decision stating that the retrieved evidence does not answer the question.
    pub fn insufficient(
        question: &str,
        entities: BTreeMap<Slot, EntityValue>,
        reason: &str,
    ) -> Self {
        Self {
            question: question.to_string(),
            answer_text: format!("The available documents do not answer this question: {reason}."),
            decision_label: DecisionLabel::InsufficientEvidence,
            amount: None,
            supporting_chunk_ids: Vec::new(),
            confidence: 0.0,
            referenced_clauses: Vec::new(),
            entities,
        }
    }

    /// Whether the grounding invariant holds against the chunk ids supplied to synthesis.
    pub fn is_grounded_in(&self, supplied: &[ChunkId]) -> bool {
        let cited_supplied = self
            .supporting_chunk_ids
            .iter()
            .all(|id| supplied.contains(id));
        match self.decision_label {
            DecisionLabel::InsufficientEvidence => self.supporting_chunk_ids.is_empty(),
            _ => !self.supporting_chunk_ids.is_empty() && cited_supplied,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_parse_leniently() {
        assert_eq!(DecisionLabel::parse("approved"), Some(DecisionLabel::Approved));
        assert_eq!(DecisionLabel::parse(" Not covered "), Some(DecisionLabel::Rejected));
        assert_eq!(DecisionLabel::parse("info-only"), Some(DecisionLabel::InfoOnly));
        assert_eq!(
            DecisionLabel::parse("needs_review"),
            Some(DecisionLabel::InsufficientEvidence)
        );
        assert_eq!(DecisionLabel::parse("maybe"), None);
    }

    #[test]
    fn labels_serialize_in_screaming_case() {
        let json = serde_json::to_string(&DecisionLabel::InsufficientEvidence).expect("serialize");
        assert_eq!(json, "\"INSUFFICIENT_EVIDENCE\"");
    }

    #[test]
    fn insufficient_decisions_are_grounded() {
        let decision = Decision::insufficient("q", BTreeMap::new(), "nothing retrieved");
        assert!(decision.is_grounded_in(&[]));
        assert_eq!(decision.amount, None);
        assert_eq!(decision.confidence, 0.0);
    }

    #[test]
    fn citations_outside_the_supplied_set_are_ungrounded() {
        let mut decision = Decision::insufficient("q", BTreeMap::new(), "x");
        decision.decision_label = DecisionLabel::InfoOnly;
        decision.supporting_chunk_ids = vec![ChunkId::from_raw("p#00003")];
        assert!(!decision.is_grounded_in(&[ChunkId::from_raw("p#00001")]));
        assert!(decision.is_grounded_in(&[ChunkId::from_raw("p#00003")]));
    }
}
