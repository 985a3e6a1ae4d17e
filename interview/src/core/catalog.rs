//! Static task catalog: which tasks belong to which phase.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::core::phase::Phase;

/// A trackable sub-goal as declared in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskSpec {
    pub name: String,
    pub description: String,
}

/// Ordered task lists per substantive phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskCatalog {
    #[serde(default)]
    pub triage: Vec<TaskSpec>,
    #[serde(default)]
    pub hpi: Vec<TaskSpec>,
    #[serde(default)]
    pub ph: Vec<TaskSpec>,
}

impl TaskCatalog {
    pub fn tasks(&self, phase: Phase) -> &[TaskSpec] {
        match phase {
            Phase::Triage => &self.triage,
            Phase::PresentIllness => &self.hpi,
            Phase::PastHistory => &self.ph,
            Phase::Completed => &[],
        }
    }

    pub fn total_tasks(&self) -> usize {
        Phase::SUBSTANTIVE
            .iter()
            .map(|phase| self.tasks(*phase).len())
            .sum()
    }

    /// Returns one message per problem; empty when the catalog is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for phase in Phase::SUBSTANTIVE {
            let mut seen = BTreeSet::new();
            for task in self.tasks(phase) {
                if task.name.trim().is_empty() {
                    errors.push(format!("{phase}: task name must be non-empty"));
                } else if !seen.insert(task.name.as_str()) {
                    errors.push(format!("{phase}: duplicate task '{}'", task.name));
                }
            }
        }
        if self.total_tasks() == 0 {
            errors.push("catalog declares no tasks".to_string());
        }
        errors
    }
}

impl Default for TaskCatalog {
    fn default() -> Self {
        Self {
            triage: specs(&[
                (
                    "primary category",
                    "Determine the primary category the subject should be routed to.",
                ),
                (
                    "secondary category",
                    "Narrow the primary category down to a secondary category.",
                ),
            ]),
            hpi: specs(&[
                (
                    "onset",
                    "When and how the problem started, including triggers and circumstances.",
                ),
                (
                    "main symptom characteristics",
                    "Location, nature, severity, duration and frequency of the main symptom.",
                ),
                (
                    "progression",
                    "How the symptoms changed over time and what makes them better or worse.",
                ),
                (
                    "accompanying symptoms",
                    "Other symptoms that appeared together with the main one.",
                ),
                (
                    "diagnosis and treatment history",
                    "Examinations, diagnoses and treatments received for this problem and their effect.",
                ),
                (
                    "general condition",
                    "Mental state, sleep, appetite, bowel habits and weight changes since onset.",
                ),
            ]),
            ph: specs(&[
                ("disease history", "Previous and chronic diseases."),
                ("immunization history", "Vaccinations received."),
                (
                    "surgery and trauma history",
                    "Past operations, injuries and hospital stays.",
                ),
                ("transfusion history", "Blood transfusions received."),
                (
                    "allergy history",
                    "Known allergies to drugs, food or other substances.",
                ),
            ]),
        }
    }
}

fn specs(entries: &[(&str, &str)]) -> Vec<TaskSpec> {
    entries
        .iter()
        .map(|(name, description)| TaskSpec {
            name: (*name).to_string(),
            description: (*description).to_string(),
        })
        .collect()
}
