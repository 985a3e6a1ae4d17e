//! Shared data types for turns and runs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::transcript::Round;

/// Long-form record fields the extraction role keeps up to date.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryFields {
    pub chief_complaint: String,
    pub present_illness: String,
    pub past_history: String,
}

impl SummaryFields {
    pub fn is_empty(&self) -> bool {
        self.chief_complaint.trim().is_empty()
            && self.present_illness.trim().is_empty()
            && self.past_history.trim().is_empty()
    }
}

/// Latest category assignment with an alternate candidate pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub primary: String,
    pub secondary: String,
    pub reasoning: String,
    pub candidate_primary: String,
    pub candidate_secondary: String,
}

impl Classification {
    pub fn is_empty(&self) -> bool {
        self.primary.trim().is_empty()
    }

    /// `primary-secondary`, the key guidance is looked up by.
    pub fn category_key(&self) -> Option<String> {
        join_key(&self.primary, &self.secondary)
    }

    pub fn candidate_key(&self) -> Option<String> {
        join_key(&self.candidate_primary, &self.candidate_secondary)
    }
}

fn join_key(primary: &str, secondary: &str) -> Option<String> {
    let primary = primary.trim();
    let secondary = secondary.trim();
    match (primary.is_empty(), secondary.is_empty()) {
        (true, _) => None,
        (false, true) => Some(primary.to_string()),
        (false, false) => Some(format!("{primary}-{secondary}")),
    }
}

/// Quality dimensions the evaluation role scores on a 0 to 5 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityDimension {
    ClinicalInquiry,
    CommunicationQuality,
    InformationCompleteness,
    OverallProfessionalism,
    PresentIllnessSimilarity,
    PastHistorySimilarity,
    ChiefComplaintSimilarity,
}

impl QualityDimension {
    pub const ALL: [QualityDimension; 7] = [
        QualityDimension::ClinicalInquiry,
        QualityDimension::CommunicationQuality,
        QualityDimension::InformationCompleteness,
        QualityDimension::OverallProfessionalism,
        QualityDimension::PresentIllnessSimilarity,
        QualityDimension::PastHistorySimilarity,
        QualityDimension::ChiefComplaintSimilarity,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub score: f64,
    pub comment: String,
}

impl DimensionScore {
    fn failed() -> Self {
        Self {
            score: 0.0,
            comment: "evaluation failed".to_string(),
        }
    }
}

/// Output of the quality-evaluation role for one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub clinical_inquiry: DimensionScore,
    pub communication_quality: DimensionScore,
    pub information_completeness: DimensionScore,
    pub overall_professionalism: DimensionScore,
    pub present_illness_similarity: DimensionScore,
    pub past_history_similarity: DimensionScore,
    pub chief_complaint_similarity: DimensionScore,
    pub summary: String,
    #[serde(default)]
    pub key_suggestions: Vec<String>,
}

impl Evaluation {
    /// Placeholder recorded when the evaluation role fails.
    pub fn failed() -> Self {
        Self {
            clinical_inquiry: DimensionScore::failed(),
            communication_quality: DimensionScore::failed(),
            information_completeness: DimensionScore::failed(),
            overall_professionalism: DimensionScore::failed(),
            present_illness_similarity: DimensionScore::failed(),
            past_history_similarity: DimensionScore::failed(),
            chief_complaint_similarity: DimensionScore::failed(),
            summary: "evaluation failed".to_string(),
            key_suggestions: Vec::new(),
        }
    }

    pub fn dimension(&self, dimension: QualityDimension) -> &DimensionScore {
        match dimension {
            QualityDimension::ClinicalInquiry => &self.clinical_inquiry,
            QualityDimension::CommunicationQuality => &self.communication_quality,
            QualityDimension::InformationCompleteness => &self.information_completeness,
            QualityDimension::OverallProfessionalism => &self.overall_professionalism,
            QualityDimension::PresentIllnessSimilarity => &self.present_illness_similarity,
            QualityDimension::PastHistorySimilarity => &self.past_history_similarity,
            QualityDimension::ChiefComplaintSimilarity => &self.chief_complaint_similarity,
        }
    }

    pub fn scores(&self) -> HistoricalScores {
        let score = |dimension| self.dimension(dimension).score;
        HistoricalScores {
            clinical_inquiry: score(QualityDimension::ClinicalInquiry),
            communication_quality: score(QualityDimension::CommunicationQuality),
            information_completeness: score(QualityDimension::InformationCompleteness),
            overall_professionalism: score(QualityDimension::OverallProfessionalism),
            present_illness_similarity: score(QualityDimension::PresentIllnessSimilarity),
            past_history_similarity: score(QualityDimension::PastHistorySimilarity),
            chief_complaint_similarity: score(QualityDimension::ChiefComplaintSimilarity),
        }
    }
}

/// Previous turn's dimension scores, fed into the next evaluation.
///
/// Lives on [`WorkflowState`] so every run carries its own history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoricalScores {
    pub clinical_inquiry: f64,
    pub communication_quality: f64,
    pub information_completeness: f64,
    pub overall_professionalism: f64,
    pub present_illness_similarity: f64,
    pub past_history_similarity: f64,
    pub chief_complaint_similarity: f64,
}

/// Snapshot owned by the run loop and replaced only after a successful turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkflowState {
    /// Turns completed so far.
    pub turn: u32,
    pub transcript: String,
    /// Every exchange so far, in order. The transcript is its text rendering.
    pub rounds: Vec<Round>,
    pub summary: SummaryFields,
    pub classification: Classification,
    pub guidance: String,
    /// Question the subject answers next turn; empty before the first turn.
    pub last_question: String,
    pub historical_scores: HistoricalScores,
}

impl WorkflowState {
    pub fn with_guidance(guidance: impl Into<String>) -> Self {
        Self {
            guidance: guidance.into(),
            ..Self::default()
        }
    }
}

/// Case material the simulated subject answers from and the evaluator
/// compares against. Arbitrary JSON object; `id` is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub record: Map<String, Value>,
}

impl CaseContext {
    /// Short human label for logs.
    pub fn label(&self) -> String {
        if let Some(id) = &self.id {
            return id.clone();
        }
        self.record
            .get("chief_complaint")
            .and_then(Value::as_str)
            .map(|text| text.chars().take(40).collect())
            .unwrap_or_else(|| "unnamed case".to_string())
    }
}
