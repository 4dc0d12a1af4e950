//! Follow-up probe
//!
//! Given a branch's Q&A history, decide whether the branch is finished
//! (producing its finding) or which question to ask next. Pure and
//! deterministic; the orchestrator calls it once per recorded answer.

use serde_json::{json, Value};

use crate::models::QuestionType;
use crate::state::{Branch, BranchQuestion};

/// Maximum answered questions before a branch is synthesized regardless
const MAX_ANSWERS_PER_BRANCH: usize = 3;

/// Answer text longer than this is truncated in summaries
const SUMMARY_TEXT_LIMIT: usize = 100;

/// A follow-up question the probe wants asked
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeQuestion {
    pub question_type: QuestionType,
    pub config: Value,
}

impl ProbeQuestion {
    /// Human-readable question text, as rendered by the browser
    pub fn text(&self) -> String {
        self.config
            .get("question")
            .and_then(|q| q.as_str())
            .unwrap_or_default()
            .to_string()
    }
}

/// Probe verdict: the branch is done, or it should continue (optionally
/// with a new question; without one the caller just keeps waiting)
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeVerdict {
    Done { finding: String },
    Continue { question: Option<ProbeQuestion> },
}

/// Decide the next step for a branch
pub fn probe(branch: &Branch) -> ProbeVerdict {
    // An unanswered question is still on screen; nothing to do yet
    if branch.has_pending_questions() {
        return ProbeVerdict::Continue { question: None };
    }

    let answered = branch.answered_questions();

    if answered.len() >= MAX_ANSWERS_PER_BRANCH {
        return ProbeVerdict::Done {
            finding: synthesize(branch),
        };
    }

    if let Some(last) = answered.last() {
        if last.question_type == QuestionType::Confirm {
            match confirm_choice(last) {
                Some("yes") => {
                    return ProbeVerdict::Done {
                        finding: synthesize(branch),
                    }
                }
                Some("no") => {
                    return ProbeVerdict::Continue {
                        question: Some(ProbeQuestion {
                            question_type: QuestionType::AskText,
                            config: json!({
                                "question": format!(
                                    "What aspect of '{}' needs more discussion?",
                                    branch.scope
                                ),
                            }),
                        }),
                    }
                }
                _ => {}
            }
        }
    }

    match answered.len() {
        1 => ProbeVerdict::Continue {
            question: Some(priority_question(&branch.scope)),
        },
        2 => ProbeVerdict::Continue {
            question: Some(ProbeQuestion {
                question_type: QuestionType::Confirm,
                config: json!({
                    "question": format!("Is the direction clear for '{}'?", branch.scope),
                }),
            }),
        },
        _ => ProbeVerdict::Done {
            finding: synthesize(branch),
        },
    }
}

/// Scope-derived priority follow-up asked after the first answer
fn priority_question(scope: &str) -> ProbeQuestion {
    ProbeQuestion {
        question_type: QuestionType::PickOne,
        config: json!({
            "question": format!("What matters most for '{}'?", scope),
            "options": [
                {"id": "simplicity", "label": "Simplicity"},
                {"id": "speed", "label": "Speed to ship"},
                {"id": "flexibility", "label": "Flexibility"},
                {"id": "robustness", "label": "Robustness"},
            ],
        }),
    }
}

fn confirm_choice(question: &BranchQuestion) -> Option<&str> {
    question
        .answer
        .as_ref()
        .and_then(|a| a.get("choice"))
        .and_then(|c| c.as_str())
}

/// Synthesize a one-sentence finding from a branch's answers.
///
/// The first answer's summary is the headline; later summaries qualify it,
/// skipping bare affirmations like a confirm's "yes".
pub fn synthesize(branch: &Branch) -> String {
    let answered = branch.answered_questions();

    let mut summaries = answered
        .iter()
        .filter_map(|q| q.answer.as_ref())
        .map(summarize_answer);

    let headline = match summaries.next() {
        Some(s) => s,
        None => return format!("No discussion recorded for '{}'", branch.scope),
    };

    let qualifiers: Vec<String> = summaries.filter(|s| !is_affirmation(s)).collect();

    if qualifiers.is_empty() {
        headline
    } else {
        format!("{} ({})", headline, qualifiers.join("; "))
    }
}

fn is_affirmation(summary: &str) -> bool {
    matches!(summary, "yes" | "Yes" | "ready to proceed")
}

/// Derive a short human summary from a response payload.
///
/// Tries `selected`, `choice`, `text` (truncated), `value`, then the first
/// non-null field; falls back to "unspecified".
pub fn summarize_answer(answer: &Value) -> String {
    if let Some(selected) = answer.get("selected") {
        if let Some(items) = selected.as_array() {
            let labels: Vec<&str> = items.iter().filter_map(|v| v.as_str()).collect();
            if !labels.is_empty() {
                return labels.join(", ");
            }
        }
        if let Some(s) = selected.as_str() {
            return s.to_string();
        }
    }

    if let Some(choice) = answer.get("choice").and_then(|c| c.as_str()) {
        return choice.to_string();
    }

    if let Some(text) = answer.get("text").and_then(|t| t.as_str()) {
        return truncate(text, SUMMARY_TEXT_LIMIT);
    }

    if let Some(value) = answer.get("value") {
        return display_value(value);
    }

    if let Some(map) = answer.as_object() {
        if let Some(first) = map.values().find(|v| !v.is_null()) {
            return display_value(first);
        }
    }

    "unspecified".to_string()
}

fn display_value(value: &Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        text.chars().take(limit).collect()
    }
}
