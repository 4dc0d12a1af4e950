//! Brainstorm orchestrator
//!
//! Couples the live session store and the durable branch state store:
//! creates branches with one seed question each, routes every browser
//! answer to its branch, asks the probe for follow-ups, and drives the
//! final plan-review interaction once all branches are done.

#[cfg(test)]
mod tests;

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::models::{new_id, QuestionType, StartSessionOutput};
use crate::probe::{probe, ProbeVerdict};
use crate::session::{SessionError, SessionStore};
use crate::state::{BrainstormState, BrainstormStore, BranchStatus, NewBranchQuestion};

/// Hard cap on main-loop iterations; the caller can resume if hit
const MAX_ITERATIONS: usize = 50;

/// Wait for the next branch answer (5 minutes)
const ANSWER_WAIT_MS: u64 = 300_000;

/// Wait for the plan review response (10 minutes)
const REVIEW_WAIT_MS: u64 = 600_000;

/// A branch requested by the agent when creating a brainstorm
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchSpec {
    pub id: String,
    pub scope: String,
    pub initial_question: InitialQuestion,
}

/// The seed question opening a branch
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialQuestion {
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub config: Value,
}

/// Result of `create_brainstorm`
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBrainstormOutput {
    pub session_id: String,
    pub browser_session_id: String,
    pub url: String,
    pub summary: String,
}

/// Orchestrates brainstorm sessions over the two stores
#[derive(Clone)]
pub struct BrainstormService {
    sessions: SessionStore,
    state: Arc<BrainstormStore>,
}

impl BrainstormService {
    pub fn new(sessions: SessionStore, state: Arc<BrainstormStore>) -> Self {
        Self { sessions, state }
    }

    /// Create a brainstorm: persist its branches, open a browser session
    /// seeded with one question per branch, and bind the two together.
    pub async fn create_brainstorm(
        &self,
        request: &str,
        branches: Vec<BranchSpec>,
    ) -> Result<CreateBrainstormOutput, String> {
        if branches.is_empty() {
            return Err("At least one branch is required".to_string());
        }

        let session_id = new_id("ses_");
        let branch_pairs: Vec<(String, String)> = branches
            .iter()
            .map(|b| (b.id.clone(), b.scope.clone()))
            .collect();
        self.state
            .create_session(&session_id, request, &branch_pairs)
            .await
            .map_err(|e| e.to_string())?;

        // Seed questions carry their branch scope on-screen via the
        // config's context line
        let seeds: Vec<(QuestionType, Value)> = branches
            .iter()
            .map(|b| {
                let mut config = b.initial_question.config.clone();
                if let Some(object) = config.as_object_mut() {
                    let prior = object
                        .get("context")
                        .and_then(|c| c.as_str())
                        .unwrap_or("")
                        .to_string();
                    let tagged = format!("[{}] {}", b.scope, prior);
                    object.insert(
                        "context".to_string(),
                        Value::String(tagged.trim_end().to_string()),
                    );
                }
                (b.initial_question.question_type, config)
            })
            .collect();

        let StartSessionOutput {
            session_id: browser_session_id,
            url,
            question_ids,
        } = match self
            .sessions
            .start_session(Some(request.to_string()), seeds)
            .await
        {
            Ok(output) => output,
            Err(e) => {
                // Leave no orphaned state behind
                let _ = self.state.delete_session(&session_id).await;
                return Err(e.to_string());
            }
        };

        self.state
            .set_browser_session_id(&session_id, &browser_session_id)
            .await
            .map_err(|e| e.to_string())?;

        let question_ids = question_ids.unwrap_or_default();
        for (branch, question_id) in branches.iter().zip(question_ids.iter()) {
            self.state
                .add_question_to_branch(
                    &session_id,
                    &branch.id,
                    NewBranchQuestion {
                        id: question_id.clone(),
                        question_type: branch.initial_question.question_type,
                        text: question_text(&branch.initial_question.config),
                        config: branch.initial_question.config.clone(),
                    },
                )
                .await
                .map_err(|e| e.to_string())?;
        }

        let mut summary = format!(
            "Started brainstorm {} for \"{}\" with {} branches:\n",
            session_id,
            request,
            branches.len()
        );
        for branch in &branches {
            summary.push_str(&format!("  - {}: {}\n", branch.id, branch.scope));
        }
        summary.push_str(&format!(
            "Browser session {} is live at {}. Answers are collected by await_brainstorm_complete.",
            browser_session_id, url
        ));

        log::info!(
            "Created brainstorm {} bound to browser session {}",
            session_id,
            browser_session_id
        );
        Ok(CreateBrainstormOutput {
            session_id,
            browser_session_id,
            url,
            summary,
        })
    }

    /// Main loop: consume answers until every branch is done, then drive
    /// the plan review. Returns a human-readable outcome summary.
    ///
    /// Safe to call again if it returns with branches still in progress.
    pub async fn await_brainstorm_complete(
        &self,
        session_id: &str,
        browser_session_id: &str,
    ) -> Result<String, String> {
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        for iteration in 0..MAX_ITERATIONS {
            match self.state.is_session_complete(session_id).await {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => {
                    log::warn!("State read failed in brainstorm loop: {}", e);
                    break;
                }
            }

            let next = self
                .sessions
                .get_next_answer(browser_session_id, true, Some(ANSWER_WAIT_MS))
                .await;

            if !next.completed {
                match next.status.as_str() {
                    "none_pending" => {
                        // Follow-up pushes may be in flight; let them land
                        drain_tasks(&mut tasks).await;
                        continue;
                    }
                    "timeout" => {
                        log::warn!(
                            "No answer within {}ms on iteration {}, stopping",
                            ANSWER_WAIT_MS,
                            iteration
                        );
                        break;
                    }
                    _ => continue,
                }
            } else if let (Some(question_id), Some(response)) =
                (next.question_id, next.response)
            {
                let service = self.clone();
                let session = session_id.to_string();
                let browser_session = browser_session_id.to_string();
                tasks.push(tokio::spawn(async move {
                    if let Err(e) = service
                        .process_answer(&session, &browser_session, &question_id, response)
                        .await
                    {
                        log::error!("Failed to process answer {}: {}", question_id, e);
                    }
                }));
            }
        }

        drain_tasks(&mut tasks).await;

        let state = self
            .state
            .get_session(session_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("Session '{}' not found", session_id))?;

        if !state.is_complete() {
            return Ok(progress_summary(&state));
        }

        self.review_plan(&state, browser_session_id).await
    }

    /// Push the findings as a `show_plan` and wait for the review response
    async fn review_plan(
        &self,
        state: &BrainstormState,
        browser_session_id: &str,
    ) -> Result<String, String> {
        let config = json!({
            "question": format!("Review the plan for \"{}\"", state.request),
            "sections": plan_sections(state),
        });

        match self
            .sessions
            .push_question(browser_session_id, QuestionType::ShowPlan, config)
        {
            Ok(_) => {}
            Err(SessionError::SessionNotFound(_)) => {
                // Browser session already gone; report without review
                log::warn!(
                    "Browser session {} gone, returning findings without review",
                    browser_session_id
                );
                return Ok(findings_summary(state, None));
            }
            Err(e) => return Err(e.to_string()),
        }

        let review = self
            .sessions
            .get_next_answer(browser_session_id, true, Some(REVIEW_WAIT_MS))
            .await;

        let verdict = review.response.map(|response| review_verdict(&response));
        Ok(findings_summary(state, verdict))
    }

    /// Route one answer to its branch and advance that branch
    pub async fn process_answer(
        &self,
        session_id: &str,
        browser_session_id: &str,
        question_id: &str,
        response: Value,
    ) -> Result<(), String> {
        let state = self
            .state
            .get_session(session_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("Session '{}' not found", session_id))?;
        let branch_id = state
            .branch_for_question(question_id)
            .map(|b| b.id.clone())
            .ok_or_else(|| format!("Question {} belongs to no branch", question_id))?;

        self.state
            .record_answer(session_id, question_id, response)
            .await
            .map_err(|e| e.to_string())?;

        // Probe over the snapshot the serialized write produced
        let state = self
            .state
            .get_session(session_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("Session '{}' not found", session_id))?;
        let branch = state
            .branches
            .get(&branch_id)
            .ok_or_else(|| format!("Branch '{}' disappeared", branch_id))?;
        if branch.status == BranchStatus::Done {
            return Ok(());
        }

        match probe(branch) {
            ProbeVerdict::Done { finding } => {
                log::info!("Branch {} complete: {}", branch_id, finding);
                self.state
                    .complete_branch(session_id, &branch_id, &finding)
                    .await
                    .map_err(|e| e.to_string())?;
            }
            ProbeVerdict::Continue {
                question: Some(question),
            } => {
                let new_question_id = self
                    .sessions
                    .push_question(
                        browser_session_id,
                        question.question_type,
                        question.config.clone(),
                    )
                    .map_err(|e| e.to_string())?;
                self.state
                    .add_question_to_branch(
                        session_id,
                        &branch_id,
                        NewBranchQuestion {
                            id: new_question_id,
                            question_type: question.question_type,
                            text: question.text(),
                            config: question.config,
                        },
                    )
                    .await
                    .map_err(|e| e.to_string())?;
            }
            ProbeVerdict::Continue { question: None } => {}
        }

        Ok(())
    }

    /// Close the browser session, emit findings, and delete the state
    pub async fn end_brainstorm(&self, session_id: &str) -> Result<String, String> {
        let state = self
            .state
            .get_session(session_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("Session '{}' not found", session_id))?;

        if let Some(browser_session_id) = &state.browser_session_id {
            let result = self.sessions.end_session(browser_session_id);
            if !result.ok {
                log::debug!("Browser session {} was already gone", browser_session_id);
            }
        }

        let findings = findings_summary(&state, None);
        self.state
            .delete_session(session_id)
            .await
            .map_err(|e| e.to_string())?;
        Ok(findings)
    }

    /// Render the current status of every branch with its Q&A history
    pub async fn get_session_summary(&self, session_id: &str) -> Result<String, String> {
        let state = self
            .state
            .get_session(session_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("Session '{}' not found", session_id))?;

        let mut summary = format!("Brainstorm {}: \"{}\"\n", state.session_id, state.request);
        for branch_id in &state.branch_order {
            let branch = match state.branches.get(branch_id) {
                Some(b) => b,
                None => continue,
            };
            summary.push_str(&format!(
                "\n[{}] {} ({:?})\n",
                branch.id, branch.scope, branch.status
            ));
            if branch.questions.is_empty() {
                summary.push_str("  (no questions)\n");
            }
            for question in &branch.questions {
                summary.push_str(&format!("  Q: {}\n", question.text));
                match &question.answer {
                    Some(answer) => {
                        summary.push_str(&format!(
                            "  A: {}\n",
                            crate::probe::summarize_answer(answer)
                        ));
                    }
                    None => summary.push_str("  A: (no answers)\n"),
                }
            }
            if let Some(finding) = &branch.finding {
                summary.push_str(&format!("  Finding: {}\n", finding));
            }
        }
        Ok(summary)
    }
}

/// Await all spawned answer-processing tasks, clearing the list
async fn drain_tasks(tasks: &mut Vec<JoinHandle<()>>) {
    for task in tasks.drain(..) {
        if let Err(e) = task.await {
            log::error!("Answer task panicked: {}", e);
        }
    }
}

fn question_text(config: &Value) -> String {
    config
        .get("question")
        .and_then(|q| q.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Sections for the `show_plan` review: the original request first, then
/// one section per branch
fn plan_sections(state: &BrainstormState) -> Vec<Value> {
    let mut sections = vec![json!({
        "id": "request",
        "title": "Original Request",
        "content": state.request,
    })];
    for branch_id in &state.branch_order {
        if let Some(branch) = state.branches.get(branch_id) {
            let discussion: Vec<String> = branch
                .questions
                .iter()
                .filter_map(|q| {
                    q.answer.as_ref().map(|a| {
                        format!("{} -> {}", q.text, crate::probe::summarize_answer(a))
                    })
                })
                .collect();
            sections.push(json!({
                "id": branch.id,
                "title": branch.scope,
                "content": format!(
                    "Finding: {}\nDiscussion: {}",
                    branch.finding.as_deref().unwrap_or("(none)"),
                    discussion.join("; "),
                ),
            }));
        }
    }
    sections
}

/// Outcome of the plan review interaction
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewVerdict {
    pub approved: bool,
    pub feedback: Option<String>,
}

/// Interpret a `show_plan` response (with confirm-style fallbacks)
fn review_verdict(response: &Value) -> ReviewVerdict {
    let approved = response.get("approved").and_then(|a| a.as_bool()) == Some(true)
        || response.get("choice").and_then(|c| c.as_str()) == Some("yes");

    let feedback = if let Some(annotations) =
        response.get("annotations").and_then(|a| a.as_object())
    {
        let notes: Vec<String> = annotations
            .iter()
            .filter_map(|(section, note)| note.as_str().map(|n| format!("{}: {}", section, n)))
            .collect();
        if notes.is_empty() {
            None
        } else {
            Some(notes.join("; "))
        }
    } else {
        response
            .get("feedback")
            .or_else(|| response.get("text"))
            .and_then(|f| f.as_str())
            .filter(|f| !f.is_empty())
            .map(|f| f.to_string())
    };

    ReviewVerdict { approved, feedback }
}

/// Summary returned while branches are still exploring
fn progress_summary(state: &BrainstormState) -> String {
    let mut summary = format!(
        "Brainstorm {} still in progress; call await_brainstorm_complete again to resume.\n",
        state.session_id
    );
    for branch_id in &state.branch_order {
        if let Some(branch) = state.branches.get(branch_id) {
            let status = match branch.status {
                BranchStatus::Done => "done",
                BranchStatus::Exploring => "exploring",
            };
            summary.push_str(&format!("  - {} ({}): {}\n", branch.id, status, branch.scope));
        }
    }
    summary
}

/// Final findings rendering, with the review outcome when one happened
fn findings_summary(state: &BrainstormState, review: Option<ReviewVerdict>) -> String {
    let mut summary = format!("Brainstorm findings for \"{}\":\n", state.request);
    for branch_id in &state.branch_order {
        if let Some(branch) = state.branches.get(branch_id) {
            summary.push_str(&format!(
                "  - {} ({}): {}\n",
                branch.id,
                branch.scope,
                branch.finding.as_deref().unwrap_or("(still exploring)"),
            ));
        }
    }
    match review {
        Some(verdict) => {
            summary.push_str(&format!(
                "Plan review: {}\n",
                if verdict.approved {
                    "approved"
                } else {
                    "changes requested"
                }
            ));
            if let Some(feedback) = verdict.feedback {
                summary.push_str(&format!("Feedback: {}\n", feedback));
            }
        }
        None => summary.push_str("Plan review: not held\n"),
    }
    summary
}
