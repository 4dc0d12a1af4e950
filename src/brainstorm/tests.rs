//! End-to-end tests for the brainstorm orchestrator
//!
//! A background responder plays the human: it polls the session's pending
//! questions and answers each one by type, the way the browser UI would.

use super::*;
use crate::models::QuestionStatus;
use crate::session::SessionStore;
use std::collections::HashSet;
use std::time::Duration;
use tempfile::TempDir;

fn service(dir: &TempDir) -> BrainstormService {
    let sessions = SessionStore::new(true);
    let state = Arc::new(BrainstormStore::new(dir.path()));
    BrainstormService::new(sessions, state)
}

fn two_branches() -> Vec<BranchSpec> {
    vec![
        BranchSpec {
            id: "services".to_string(),
            scope: "Which services need healthchecks".to_string(),
            initial_question: InitialQuestion {
                question_type: QuestionType::AskText,
                config: json!({"question": "Which services?"}),
            },
        },
        BranchSpec {
            id: "format".to_string(),
            scope: "Response format".to_string(),
            initial_question: InitialQuestion {
                question_type: QuestionType::PickOne,
                config: json!({
                    "question": "JSON or plain?",
                    "options": [
                        {"id": "j", "label": "JSON"},
                        {"id": "p", "label": "Plain"},
                    ],
                }),
            },
        },
    ]
}

/// Answer every pending question the way a cooperative human would
fn spawn_responder(sessions: SessionStore, session_id: String) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut answered: HashSet<String> = HashSet::new();
        for _ in 0..300 {
            for question in sessions.list_questions(Some(&session_id)) {
                if question.status != QuestionStatus::Pending
                    || answered.contains(&question.id)
                {
                    continue;
                }
                let answer = match question.question_type {
                    QuestionType::AskText => json!({"text": "api, worker"}),
                    QuestionType::PickOne => json!({"selected": "j"}),
                    QuestionType::Confirm => json!({"choice": "yes"}),
                    QuestionType::ShowPlan => {
                        json!({"approved": true, "annotations": {"request": "ship it"}})
                    }
                    _ => json!({"text": "ok"}),
                };
                sessions.record_response(&session_id, &question.id, answer);
                answered.insert(question.id.clone());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
}

#[tokio::test]
async fn test_create_brainstorm_binds_sessions_and_tags_context() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);

    let output = service
        .create_brainstorm("Add healthcheck", two_branches())
        .await
        .unwrap();
    assert!(output.session_id.starts_with("ses_"));
    assert!(output.browser_session_id.starts_with("ses_"));
    assert!(output.summary.contains("services"));
    assert!(output.summary.contains(&output.url));

    let state = service
        .state
        .get_session(&output.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        state.browser_session_id.as_deref(),
        Some(output.browser_session_id.as_str())
    );
    assert_eq!(state.branch_order, vec!["services", "format"]);

    // Every branch got its seed question, live in the browser session
    for branch_id in &state.branch_order {
        assert_eq!(state.branches[branch_id].questions.len(), 1);
    }
    let seeds = service
        .sessions
        .list_questions(Some(&output.browser_session_id));
    assert_eq!(seeds.len(), 2);

    service.end_brainstorm(&output.session_id).await.unwrap();
}

#[tokio::test]
async fn test_two_branches_complete_with_findings() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);

    let output = service
        .create_brainstorm("Add healthcheck", two_branches())
        .await
        .unwrap();
    let responder = spawn_responder(
        service.sessions.clone(),
        output.browser_session_id.clone(),
    );

    let summary = service
        .await_brainstorm_complete(&output.session_id, &output.browser_session_id)
        .await
        .unwrap();
    responder.abort();

    assert!(
        service
            .state
            .is_session_complete(&output.session_id)
            .await
            .unwrap(),
        "all branches should be done"
    );

    let state = service
        .state
        .get_session(&output.session_id)
        .await
        .unwrap()
        .unwrap();
    for branch_id in ["services", "format"] {
        let branch = &state.branches[branch_id];
        assert!(
            branch.finding.as_deref().map_or(false, |f| !f.is_empty()),
            "branch {} should carry a finding",
            branch_id
        );
    }

    // The responder approved the plan
    assert!(summary.contains("approved"));
    assert!(summary.contains("ship it"));
}

#[tokio::test]
async fn test_session_summary_renders_answers() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);

    let output = service
        .create_brainstorm("Add healthcheck", two_branches())
        .await
        .unwrap();

    // Nothing answered yet
    let summary = service
        .get_session_summary(&output.session_id)
        .await
        .unwrap();
    assert!(summary.contains("Which services need healthchecks"));
    assert!(summary.contains("(no answers)"));

    // Answer the services seed and route it through process_answer
    let state = service
        .state
        .get_session(&output.session_id)
        .await
        .unwrap()
        .unwrap();
    let seed_id = state.branches["services"].questions[0].id.clone();
    service.sessions.record_response(
        &output.browser_session_id,
        &seed_id,
        json!({"text": "api, worker"}),
    );
    service
        .process_answer(
            &output.session_id,
            &output.browser_session_id,
            &seed_id,
            json!({"text": "api, worker"}),
        )
        .await
        .unwrap();

    let summary = service
        .get_session_summary(&output.session_id)
        .await
        .unwrap();
    assert!(summary.contains("api, worker"));
}

#[tokio::test]
async fn test_process_answer_pushes_follow_up() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);

    let output = service
        .create_brainstorm("Add healthcheck", two_branches())
        .await
        .unwrap();
    let state = service
        .state
        .get_session(&output.session_id)
        .await
        .unwrap()
        .unwrap();
    let seed_id = state.branches["services"].questions[0].id.clone();

    service
        .process_answer(
            &output.session_id,
            &output.browser_session_id,
            &seed_id,
            json!({"text": "api, worker"}),
        )
        .await
        .unwrap();

    // One answer in: the probe asks its priority pick_one on the branch
    let state = service
        .state
        .get_session(&output.session_id)
        .await
        .unwrap()
        .unwrap();
    let branch = &state.branches["services"];
    assert_eq!(branch.status, BranchStatus::Exploring);
    assert_eq!(branch.questions.len(), 2);
    assert_eq!(branch.questions[1].question_type, QuestionType::PickOne);

    // And the follow-up is live in the browser session
    let live = service
        .sessions
        .list_questions(Some(&output.browser_session_id));
    assert_eq!(live.len(), 3);

    // An answer for an unrelated question id is an error, which the main
    // loop logs and swallows
    let err = service
        .process_answer(
            &output.session_id,
            &output.browser_session_id,
            "q_unknown1",
            json!({"text": "x"}),
        )
        .await
        .unwrap_err();
    assert!(err.contains("belongs to no branch"));
}

#[tokio::test]
async fn test_end_brainstorm_tears_everything_down() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);

    let output = service
        .create_brainstorm("Add healthcheck", two_branches())
        .await
        .unwrap();

    let findings = service.end_brainstorm(&output.session_id).await.unwrap();
    assert!(findings.contains("services"));
    assert!(findings.contains("still exploring"));

    // State file gone, browser session gone
    assert!(service
        .state
        .get_session(&output.session_id)
        .await
        .unwrap()
        .is_none());
    assert!(service
        .sessions
        .session_url(&output.browser_session_id)
        .is_none());
    assert!(service.state.list().await.unwrap().is_empty());

    // Second call reports the missing session
    assert!(service.end_brainstorm(&output.session_id).await.is_err());
}

#[test]
fn test_review_verdict_interpretation() {
    let verdict = review_verdict(&json!({"approved": true}));
    assert!(verdict.approved);
    assert_eq!(verdict.feedback, None);

    let verdict = review_verdict(&json!({"choice": "yes"}));
    assert!(verdict.approved);

    let verdict = review_verdict(&json!({
        "approved": false,
        "annotations": {"services": "add the cron too", "format": "prefer JSON"},
    }));
    assert!(!verdict.approved);
    let feedback = verdict.feedback.unwrap();
    assert!(feedback.contains("services: add the cron too"));
    assert!(feedback.contains("format: prefer JSON"));

    let verdict = review_verdict(&json!({"approved": false, "feedback": "too thin"}));
    assert_eq!(verdict.feedback.as_deref(), Some("too thin"));

    let verdict = review_verdict(&json!({"text": "needs work"}));
    assert!(!verdict.approved);
    assert_eq!(verdict.feedback.as_deref(), Some("needs work"));
}

#[test]
fn test_plan_sections_lead_with_request() {
    let mut state = BrainstormState::new(
        "ses_plan0001",
        "Add healthcheck",
        &[("services".to_string(), "Which services".to_string())],
    );
    {
        let branch = state.branches.get_mut("services").unwrap();
        branch.status = BranchStatus::Done;
        branch.finding = Some("api and worker".to_string());
    }

    let sections = plan_sections(&state);
    assert_eq!(sections.len(), 2);
    assert_eq!(sections[0]["id"], "request");
    assert_eq!(sections[0]["title"], "Original Request");
    assert_eq!(sections[1]["id"], "services");
    assert!(sections[1]["content"]
        .as_str()
        .unwrap()
        .contains("api and worker"));
}
