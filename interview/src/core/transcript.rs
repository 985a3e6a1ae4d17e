//! Plain-text interview transcript.
//!
//! The transcript opens with the subject's first reply; every later turn adds
//! the interviewer's question followed by the subject's answer:
//!
//! ```text
//! Subject: I have had a cough for a week.
//! Interviewer: Do you have a fever?
//! Subject: A mild one, in the evenings.
//! ```

use serde::Serialize;

pub const SUBJECT_LABEL: &str = "Subject:";
pub const INTERVIEWER_LABEL: &str = "Interviewer:";

/// Append one exchange. On an empty transcript only the reply is written.
pub fn append_exchange(transcript: &str, question: &str, reply: &str) -> String {
    if transcript.is_empty() {
        format!("{SUBJECT_LABEL} {reply}")
    } else {
        format!("{transcript}\n{INTERVIEWER_LABEL} {question}\n{SUBJECT_LABEL} {reply}")
    }
}

/// One question/answer pair. Rounds are recorded as each turn runs and never
/// parsed back out of the transcript text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Round {
    /// Empty for the opening round, which has no recorded question.
    pub question: String,
    pub reply: String,
}

impl Round {
    /// The round [`append_exchange`] writes for this exchange.
    pub fn recorded(transcript: &str, question: &str, reply: &str) -> Self {
        Self {
            question: if transcript.is_empty() {
                String::new()
            } else {
                question.to_string()
            },
            reply: reply.to_string(),
        }
    }
}
