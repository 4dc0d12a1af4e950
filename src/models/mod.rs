//! Shared data model: questions, statuses, WebSocket frames, and the
//! output shapes returned by the tool surface.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Characters used for generated ids (lowercase alphanumeric)
const ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Length of the random part of generated ids
const ID_LEN: usize = 8;

/// Generate an opaque id with the given prefix, e.g. `new_id("q_")`
pub fn new_id(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..ID_CHARSET.len());
            ID_CHARSET[idx] as char
        })
        .collect();
    format!("{}{}", prefix, suffix)
}

/// The fixed catalog of question types the browser knows how to render
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    PickOne,
    PickMany,
    Confirm,
    AskText,
    AskImage,
    AskFile,
    AskCode,
    ShowOptions,
    ShowDiff,
    ShowPlan,
    ReviewSection,
    Rank,
    Rate,
    Thumbs,
    EmojiReact,
    Slider,
}

/// Lifecycle of a question: pending until answered, cancelled, or timed out.
/// Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    Pending,
    Answered,
    Cancelled,
    Timeout,
}

impl QuestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionStatus::Pending => "pending",
            QuestionStatus::Answered => "answered",
            QuestionStatus::Cancelled => "cancelled",
            QuestionStatus::Timeout => "timeout",
        }
    }
}

/// A question pushed to the browser UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub session_id: String,
    pub question_type: QuestionType,
    /// Type-specific configuration payload, opaque to the core
    pub config: Value,
    pub status: QuestionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    /// Whether a session-scoped consumer has already taken this answer
    #[serde(default)]
    pub retrieved: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answered_at: Option<DateTime<Utc>>,
}

impl Question {
    pub fn new(session_id: &str, question_type: QuestionType, config: Value) -> Self {
        Self {
            id: new_id("q_"),
            session_id: session_id.to_string(),
            question_type,
            config,
            status: QuestionStatus::Pending,
            response: None,
            retrieved: false,
            created_at: Utc::now(),
            answered_at: None,
        }
    }
}

/// Projection of a question for `list_questions`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionSummary {
    pub id: String,
    pub question_type: QuestionType,
    pub status: QuestionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answered_at: Option<DateTime<Utc>>,
}

impl From<&Question> for QuestionSummary {
    fn from(q: &Question) -> Self {
        Self {
            id: q.id.clone(),
            question_type: q.question_type,
            status: q.status,
            created_at: q.created_at,
            answered_at: q.answered_at,
        }
    }
}

// =============================================================================
// WebSocket frames
// =============================================================================

/// Frames the server sends to the browser client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    Question {
        id: String,
        #[serde(rename = "questionType")]
        question_type: QuestionType,
        config: Value,
    },
    Cancel {
        id: String,
    },
    End,
}

/// Frames the browser client sends to the server
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    Connected,
    Response { id: String, answer: Value },
}

// =============================================================================
// Tool surface output shapes
// =============================================================================

/// Result of `start_session`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionOutput {
    pub session_id: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_ids: Option<Vec<String>>,
}

/// Result of `get_answer`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetAnswerOutput {
    pub completed: bool,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

impl GetAnswerOutput {
    pub fn answered(response: Value) -> Self {
        Self {
            completed: true,
            status: "answered".to_string(),
            reason: None,
            response: Some(response),
        }
    }

    pub fn not_completed(status: &str) -> Self {
        Self {
            completed: false,
            status: status.to_string(),
            reason: Some(status.to_string()),
            response: None,
        }
    }
}

/// Result of `get_next_answer`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetNextAnswerOutput {
    pub completed: bool,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_type: Option<QuestionType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

impl GetNextAnswerOutput {
    pub fn answered(question_id: String, question_type: QuestionType, response: Value) -> Self {
        Self {
            completed: true,
            status: "answered".to_string(),
            question_id: Some(question_id),
            question_type: Some(question_type),
            response: Some(response),
        }
    }

    pub fn not_completed(status: &str) -> Self {
        Self {
            completed: false,
            status: status.to_string(),
            question_id: None,
            question_type: None,
            response: None,
        }
    }
}

/// Result of `end_session` and `cancel_question`
#[derive(Debug, Clone, Serialize)]
pub struct OkOutput {
    pub ok: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_id_shape() {
        let id = new_id("q_");
        assert!(id.starts_with("q_"));
        assert_eq!(id.len(), 2 + 8);
        assert!(id[2..]
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));

        let other = new_id("ses_");
        assert!(other.starts_with("ses_"));
        assert_ne!(new_id("q_"), new_id("q_"));
    }

    #[test]
    fn test_server_frame_serialization() {
        let frame = ServerFrame::Question {
            id: "q_abc12345".to_string(),
            question_type: QuestionType::PickOne,
            config: json!({"question": "JSON or plain?"}),
        };

        let text = serde_json::to_string(&frame).unwrap();
        assert!(text.contains("\"type\":\"question\""));
        assert!(text.contains("\"questionType\":\"pick_one\""));

        let end = serde_json::to_string(&ServerFrame::End).unwrap();
        assert_eq!(end, r#"{"type":"end"}"#);
    }

    #[test]
    fn test_client_frame_deserialization() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"response","id":"q_x","answer":{"text":"hi"}}"#)
                .unwrap();
        match frame {
            ClientFrame::Response { id, answer } => {
                assert_eq!(id, "q_x");
                assert_eq!(answer["text"], "hi");
            }
            _ => panic!("expected response frame"),
        }

        let connected: ClientFrame = serde_json::from_str(r#"{"type":"connected"}"#).unwrap();
        assert!(matches!(connected, ClientFrame::Connected));

        // Unknown frames fail to parse and are ignored by the transport
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"bogus"}"#).is_err());
    }

    #[test]
    fn test_question_status_roundtrip() {
        let q = Question::new("ses_abc", QuestionType::Confirm, json!({"question": "OK?"}));
        assert_eq!(q.status, QuestionStatus::Pending);
        assert!(!q.retrieved);

        let text = serde_json::to_string(&q).unwrap();
        let back: Question = serde_json::from_str(&text).unwrap();
        assert_eq!(back.id, q.id);
        assert_eq!(back.status, QuestionStatus::Pending);
    }
}
