//! Durable branch state
//!
//! One `BrainstormState` per brainstorm session, persisted as a JSON file
//! under the configured state directory. The store serializes all mutations
//! per session so concurrent answer recordings cannot drop writes.

pub mod fs;
mod store;

pub use store::{BrainstormStore, NewBranchQuestion};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::models::QuestionType;

/// Error types for state store operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// `create_session` on an id that is already persisted
    SessionAlreadyExists(String),
    /// Operation on an unknown session id
    SessionNotFound(String),
    /// Operation on an unknown branch id
    BranchNotFound {
        session_id: String,
        branch_id: String,
    },
    /// Mutation attempted on a branch that already reached `done`
    BranchAlreadyDone(String),
    /// Session id contains characters unsafe for a file name
    InvalidSessionId(String),
    /// Underlying persistence failure
    Storage(String),
}

impl std::fmt::Display for StateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateError::SessionAlreadyExists(id) => {
                write!(f, "Session '{}' already exists", id)
            }
            StateError::SessionNotFound(id) => write!(f, "Session '{}' not found", id),
            StateError::BranchNotFound {
                session_id,
                branch_id,
            } => write!(
                f,
                "Branch '{}' not found in session '{}'",
                branch_id, session_id
            ),
            StateError::BranchAlreadyDone(id) => write!(f, "Branch '{}' is already done", id),
            StateError::InvalidSessionId(id) => write!(f, "Invalid session id '{}'", id),
            StateError::Storage(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl std::error::Error for StateError {}

/// Branch exploration status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    Exploring,
    Done,
}

/// A question asked within a branch, with its answer once recorded
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchQuestion {
    pub id: String,
    pub question_type: QuestionType,
    /// Human-readable question text (mirrors `config.question`)
    pub text: String,
    pub config: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answered_at: Option<DateTime<Utc>>,
}

/// One parallel strand of exploration within a brainstorm
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub id: String,
    /// One-line description of what this branch explores
    pub scope: String,
    pub status: BranchStatus,
    pub questions: Vec<BranchQuestion>,
    /// One-sentence synthesis, set when the branch completes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finding: Option<String>,
}

impl Branch {
    pub fn new(id: &str, scope: &str) -> Self {
        Self {
            id: id.to_string(),
            scope: scope.to_string(),
            status: BranchStatus::Exploring,
            questions: Vec::new(),
            finding: None,
        }
    }

    /// Questions that already carry an answer, in ask order
    pub fn answered_questions(&self) -> Vec<&BranchQuestion> {
        self.questions.iter().filter(|q| q.answer.is_some()).collect()
    }

    /// Whether any question is still waiting for its answer
    pub fn has_pending_questions(&self) -> bool {
        self.questions.iter().any(|q| q.answer.is_none())
    }
}

/// Durable state of one brainstorm session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrainstormState {
    pub session_id: String,
    /// The user's original prompt
    pub request: String,
    /// The live browser session this state is bound to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub branches: HashMap<String, Branch>,
    /// Stable iteration order over `branches`
    pub branch_order: Vec<String>,
}

impl BrainstormState {
    pub fn new(session_id: &str, request: &str, branches: &[(String, String)]) -> Self {
        let now = Utc::now();
        let mut map = HashMap::new();
        let mut order = Vec::new();
        for (id, scope) in branches {
            map.insert(id.clone(), Branch::new(id, scope));
            order.push(id.clone());
        }
        Self {
            session_id: session_id.to_string(),
            request: request.to_string(),
            browser_session_id: None,
            created_at: now,
            updated_at: now,
            branches: map,
            branch_order: order,
        }
    }

    /// First branch in `branch_order` still exploring, if any
    pub fn next_exploring_branch(&self) -> Option<&Branch> {
        self.branch_order
            .iter()
            .filter_map(|id| self.branches.get(id))
            .find(|b| b.status == BranchStatus::Exploring)
    }

    /// True iff every branch reached `done`
    pub fn is_complete(&self) -> bool {
        self.branches.values().all(|b| b.status == BranchStatus::Done)
    }

    /// Locate the branch owning `question_id`
    pub fn branch_for_question(&self, question_id: &str) -> Option<&Branch> {
        self.branch_order
            .iter()
            .filter_map(|id| self.branches.get(id))
            .find(|b| b.questions.iter().any(|q| q.id == question_id))
    }
}

/// Session ids become file names; restrict them to safe characters
pub(crate) fn validate_session_id(session_id: &str) -> Result<(), StateError> {
    if session_id.is_empty()
        || !session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(StateError::InvalidSessionId(session_id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn two_branch_state() -> BrainstormState {
        BrainstormState::new(
            "ses_test0001",
            "Add healthcheck",
            &[
                ("services".to_string(), "Which services".to_string()),
                ("format".to_string(), "Response format".to_string()),
            ],
        )
    }

    #[test]
    fn test_branch_order_matches_branches() {
        let state = two_branch_state();
        assert_eq!(state.branch_order, vec!["services", "format"]);
        for id in &state.branch_order {
            assert!(state.branches.contains_key(id));
        }
        assert_eq!(state.branch_order.len(), state.branches.len());
    }

    #[test]
    fn test_next_exploring_branch_skips_done() {
        let mut state = two_branch_state();
        assert_eq!(state.next_exploring_branch().unwrap().id, "services");

        let branch = state.branches.get_mut("services").unwrap();
        branch.status = BranchStatus::Done;
        branch.finding = Some("api and worker".to_string());
        assert_eq!(state.next_exploring_branch().unwrap().id, "format");

        state.branches.get_mut("format").unwrap().status = BranchStatus::Done;
        assert!(state.next_exploring_branch().is_none());
        assert!(state.is_complete());
    }

    #[test]
    fn test_branch_for_question() {
        let mut state = two_branch_state();
        state
            .branches
            .get_mut("format")
            .unwrap()
            .questions
            .push(BranchQuestion {
                id: "q_fmt00001".to_string(),
                question_type: QuestionType::PickOne,
                text: "JSON or plain?".to_string(),
                config: json!({"question": "JSON or plain?"}),
                answer: None,
                answered_at: None,
            });

        assert_eq!(state.branch_for_question("q_fmt00001").unwrap().id, "format");
        assert!(state.branch_for_question("q_missing").is_none());
    }

    #[test]
    fn test_state_json_roundtrip() {
        let mut state = two_branch_state();
        state.browser_session_id = Some("ses_browser1".to_string());
        state
            .branches
            .get_mut("services")
            .unwrap()
            .questions
            .push(BranchQuestion {
                id: "q_svc00001".to_string(),
                question_type: QuestionType::AskText,
                text: "Which services?".to_string(),
                config: json!({"question": "Which services?"}),
                answer: Some(json!({"text": "api, worker"})),
                answered_at: Some(Utc::now()),
            });

        let text = serde_json::to_string_pretty(&state).unwrap();
        let back: BrainstormState = serde_json::from_str(&text).unwrap();
        assert_eq!(back.session_id, state.session_id);
        assert_eq!(back.branch_order, state.branch_order);
        assert_eq!(
            back.branches["services"].questions[0].answer,
            state.branches["services"].questions[0].answer
        );
    }

    #[test]
    fn test_validate_session_id() {
        assert!(validate_session_id("ses_abc123").is_ok());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("../escape").is_err());
        assert!(validate_session_id("a/b").is_err());
    }
}
