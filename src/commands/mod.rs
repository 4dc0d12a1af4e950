//! Tool-surface command router
//!
//! Implements the command proxy pattern: a single `/api/invoke` endpoint
//! routes `{cmd, args}` requests from the agent to store and orchestrator
//! operations. Per-type question config shapes are validated here; the
//! core treats them as opaque.

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::brainstorm::{BrainstormService, BranchSpec};
use crate::config::AppConfig;
use crate::models::QuestionType;
use crate::session::SessionStore;
use crate::state::BrainstormStore;

/// Shared state for the control server
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionStore,
    pub state: Arc<BrainstormStore>,
    pub brainstorm: BrainstormService,
}

impl AppState {
    pub fn new(config: &AppConfig) -> Self {
        let sessions = SessionStore::new(config.skip_browser);
        let state = Arc::new(BrainstormStore::new(&config.state_dir));
        let brainstorm = BrainstormService::new(sessions.clone(), state.clone());
        Self {
            sessions,
            state,
            brainstorm,
        }
    }
}

// =============================================================================
// Argument extraction helpers
// =============================================================================

/// Extract a required argument from JSON args
fn get_arg<T: serde::de::DeserializeOwned>(args: &Value, name: &str) -> Result<T, String> {
    serde_json::from_value(
        args.get(name)
            .ok_or_else(|| format!("Missing argument: {}", name))?
            .clone(),
    )
    .map_err(|e| format!("Invalid argument {}: {}", name, e))
}

/// Extract an optional argument from JSON args
fn get_opt_arg<T: serde::de::DeserializeOwned>(
    args: &Value,
    name: &str,
) -> Result<Option<T>, String> {
    match args.get(name) {
        Some(v) if !v.is_null() => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|e| format!("Invalid argument {}: {}", name, e)),
        _ => Ok(None),
    }
}

/// A seed question supplied to `start_session`
#[derive(Debug, Deserialize)]
struct SeedQuestion {
    #[serde(rename = "type")]
    question_type: QuestionType,
    config: Value,
}

/// Per-type shape checks for a question config before it reaches the core
fn validate_question_config(question_type: QuestionType, config: &Value) -> Result<(), String> {
    let object = config
        .as_object()
        .ok_or_else(|| "Question config must be an object".to_string())?;

    if object
        .get("question")
        .and_then(|q| q.as_str())
        .map_or(true, |q| q.is_empty())
    {
        return Err("Question config requires a non-empty 'question' string".to_string());
    }

    match question_type {
        QuestionType::PickOne | QuestionType::PickMany | QuestionType::ShowOptions => {
            let options = object.get("options").and_then(|o| o.as_array());
            if options.map_or(true, |o| o.is_empty()) {
                return Err(format!(
                    "Question config for {:?} requires a non-empty 'options' array",
                    question_type
                ));
            }
        }
        QuestionType::ShowPlan => {
            if object.get("sections").and_then(|s| s.as_array()).is_none() {
                return Err("Question config for show_plan requires a 'sections' array".to_string());
            }
        }
        _ => {}
    }
    Ok(())
}

// =============================================================================
// Command routing
// =============================================================================

/// Route a command to its implementation
pub async fn route_command(cmd: &str, args: Value, state: &AppState) -> Result<Value, String> {
    match cmd {
        // --- Session store ---
        "start_session" => {
            let title: Option<String> = get_opt_arg(&args, "title")?;
            let questions: Vec<SeedQuestion> =
                get_opt_arg(&args, "questions")?.unwrap_or_default();
            let mut seeds = Vec::with_capacity(questions.len());
            for q in questions {
                validate_question_config(q.question_type, &q.config)?;
                seeds.push((q.question_type, q.config));
            }
            let result = state
                .sessions
                .start_session(title, seeds)
                .await
                .map_err(|e| e.to_string())?;
            serde_json::to_value(result).map_err(|e| e.to_string())
        }
        "end_session" => {
            let session_id: String = get_arg(&args, "sessionId")?;
            serde_json::to_value(state.sessions.end_session(&session_id))
                .map_err(|e| e.to_string())
        }
        "push_question" => {
            let session_id: String = get_arg(&args, "sessionId")?;
            let question_type: QuestionType = get_arg(&args, "type")?;
            let config: Value = get_arg(&args, "config")?;
            validate_question_config(question_type, &config)?;
            let question_id = state
                .sessions
                .push_question(&session_id, question_type, config)
                .map_err(|e| e.to_string())?;
            Ok(serde_json::json!({ "questionId": question_id }))
        }
        "get_answer" => {
            let question_id: String = get_arg(&args, "questionId")?;
            let block: bool = get_opt_arg(&args, "block")?.unwrap_or(false);
            let timeout: Option<u64> = get_opt_arg(&args, "timeout")?;
            let result = state.sessions.get_answer(&question_id, block, timeout).await;
            serde_json::to_value(result).map_err(|e| e.to_string())
        }
        "get_next_answer" => {
            let session_id: String = get_arg(&args, "sessionId")?;
            let block: bool = get_opt_arg(&args, "block")?.unwrap_or(false);
            let timeout: Option<u64> = get_opt_arg(&args, "timeout")?;
            let result = state
                .sessions
                .get_next_answer(&session_id, block, timeout)
                .await;
            serde_json::to_value(result).map_err(|e| e.to_string())
        }
        "cancel_question" => {
            let question_id: String = get_arg(&args, "questionId")?;
            serde_json::to_value(state.sessions.cancel_question(&question_id))
                .map_err(|e| e.to_string())
        }
        "list_questions" => {
            let session_id: Option<String> = get_opt_arg(&args, "sessionId")?;
            serde_json::to_value(state.sessions.list_questions(session_id.as_deref()))
                .map_err(|e| e.to_string())
        }
        "list_sessions" => {
            serde_json::to_value(state.sessions.list_sessions()).map_err(|e| e.to_string())
        }

        // --- Brainstorm orchestrator ---
        "create_brainstorm" => {
            let request: String = get_arg(&args, "request")?;
            let branches: Vec<BranchSpec> = get_arg(&args, "branches")?;
            for branch in &branches {
                validate_question_config(
                    branch.initial_question.question_type,
                    &branch.initial_question.config,
                )?;
            }
            let result = state.brainstorm.create_brainstorm(&request, branches).await?;
            serde_json::to_value(result).map_err(|e| e.to_string())
        }
        "await_brainstorm_complete" => {
            let session_id: String = get_arg(&args, "sessionId")?;
            let browser_session_id: String = get_arg(&args, "browserSessionId")?;
            let summary = state
                .brainstorm
                .await_brainstorm_complete(&session_id, &browser_session_id)
                .await?;
            Ok(serde_json::json!({ "summary": summary }))
        }
        "end_brainstorm" => {
            let session_id: String = get_arg(&args, "sessionId")?;
            let findings = state.brainstorm.end_brainstorm(&session_id).await?;
            Ok(serde_json::json!({ "findings": findings }))
        }
        "get_session_summary" => {
            let session_id: String = get_arg(&args, "sessionId")?;
            let summary = state.brainstorm.get_session_summary(&session_id).await?;
            Ok(serde_json::json!({ "summary": summary }))
        }
        "list_brainstorms" => {
            let sessions = state.state.list().await.map_err(|e| e.to_string())?;
            Ok(serde_json::json!({ "sessions": sessions }))
        }

        _ => Err(format!("Unknown command: {}", cmd)),
    }
}
