//! Serialized durable store for brainstorm state
//!
//! Every mutating operation runs under one async mutex covering the whole
//! load-modify-persist cycle, so concurrent `record_answer` calls against
//! the same session are totally ordered and no write is lost. The cached
//! copy is replaced wholesale after each mutation; callers always observe
//! the persisted state.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::fs::{ensure_dir, list_json_stems, read_json, write_json};
use super::{
    validate_session_id, Branch, BranchQuestion, BranchStatus, BrainstormState, StateError,
};
use crate::models::QuestionType;

/// Durable map from session id to brainstorm state
pub struct BrainstormStore {
    state_dir: PathBuf,
    cache: Mutex<HashMap<String, BrainstormState>>,
}

/// Input for `add_question_to_branch`
#[derive(Debug, Clone)]
pub struct NewBranchQuestion {
    pub id: String,
    pub question_type: QuestionType,
    pub text: String,
    pub config: Value,
}

impl BrainstormStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn state_path(&self, session_id: &str) -> PathBuf {
        self.state_dir.join(format!("{}.json", session_id))
    }

    /// Load a session into the cache entry if not already present.
    /// Caller must hold the cache lock.
    fn load_into(
        &self,
        cache: &mut HashMap<String, BrainstormState>,
        session_id: &str,
    ) -> Result<bool, StateError> {
        if cache.contains_key(session_id) {
            return Ok(true);
        }
        let path = self.state_path(session_id);
        if !path.exists() {
            return Ok(false);
        }
        let state: BrainstormState = read_json(&path).map_err(StateError::Storage)?;
        cache.insert(session_id.to_string(), state);
        Ok(true)
    }

    /// Run a mutation against a session's state and persist the result.
    ///
    /// The cache lock is held across load, mutation, and file write; this is
    /// the serialization point for all mutating operations.
    async fn with_session_mut<R>(
        &self,
        session_id: &str,
        mutate: impl FnOnce(&mut BrainstormState) -> Result<R, StateError>,
    ) -> Result<R, StateError> {
        validate_session_id(session_id)?;
        let mut cache = self.cache.lock().await;

        if !self.load_into(&mut cache, session_id)? {
            return Err(StateError::SessionNotFound(session_id.to_string()));
        }

        // Mutate a clone and only replace the cached copy once the file
        // write has succeeded
        let mut state = match cache.get(session_id) {
            Some(state) => state.clone(),
            None => return Err(StateError::SessionNotFound(session_id.to_string())),
        };
        let result = mutate(&mut state)?;
        state.updated_at = Utc::now();

        write_json(&self.state_path(session_id), &state).map_err(StateError::Storage)?;
        cache.insert(session_id.to_string(), state);

        Ok(result)
    }

    /// Initialize a new brainstorm session with its branches.
    ///
    /// Branches start in `exploring`; `branch_order` preserves input order.
    pub async fn create_session(
        &self,
        session_id: &str,
        request: &str,
        branches: &[(String, String)],
    ) -> Result<(), StateError> {
        validate_session_id(session_id)?;
        ensure_dir(&self.state_dir).map_err(StateError::Storage)?;

        let mut cache = self.cache.lock().await;
        if self.load_into(&mut cache, session_id)? {
            return Err(StateError::SessionAlreadyExists(session_id.to_string()));
        }

        let state = BrainstormState::new(session_id, request, branches);
        write_json(&self.state_path(session_id), &state).map_err(StateError::Storage)?;
        cache.insert(session_id.to_string(), state);

        log::info!(
            "Created brainstorm session {} with {} branches",
            session_id,
            branches.len()
        );
        Ok(())
    }

    /// Load the current state of a session; None if it does not exist
    pub async fn get_session(
        &self,
        session_id: &str,
    ) -> Result<Option<BrainstormState>, StateError> {
        validate_session_id(session_id)?;
        let mut cache = self.cache.lock().await;
        if !self.load_into(&mut cache, session_id)? {
            return Ok(None);
        }
        Ok(cache.get(session_id).cloned())
    }

    /// Attach the live browser session id
    pub async fn set_browser_session_id(
        &self,
        session_id: &str,
        browser_session_id: &str,
    ) -> Result<(), StateError> {
        let browser_session_id = browser_session_id.to_string();
        self.with_session_mut(session_id, move |state| {
            state.browser_session_id = Some(browser_session_id);
            Ok(())
        })
        .await
    }

    /// Append a question to a branch's history
    pub async fn add_question_to_branch(
        &self,
        session_id: &str,
        branch_id: &str,
        question: NewBranchQuestion,
    ) -> Result<(), StateError> {
        let session = session_id.to_string();
        let branch_id = branch_id.to_string();
        self.with_session_mut(session_id, move |state| {
            let branch = state
                .branches
                .get_mut(&branch_id)
                .ok_or(StateError::BranchNotFound {
                    session_id: session,
                    branch_id: branch_id.clone(),
                })?;
            if branch.status == BranchStatus::Done {
                return Err(StateError::BranchAlreadyDone(branch_id.clone()));
            }
            branch.questions.push(BranchQuestion {
                id: question.id,
                question_type: question.question_type,
                text: question.text,
                config: question.config,
                answer: None,
                answered_at: None,
            });
            Ok(())
        })
        .await
    }

    /// Record an answer against the branch question that owns `question_id`.
    ///
    /// No-op if the question is unknown or already answered, so repeated
    /// delivery of the same answer is harmless.
    pub async fn record_answer(
        &self,
        session_id: &str,
        question_id: &str,
        answer: Value,
    ) -> Result<(), StateError> {
        let question_id = question_id.to_string();
        self.with_session_mut(session_id, move |state| {
            for branch in state.branches.values_mut() {
                if let Some(q) = branch.questions.iter_mut().find(|q| q.id == question_id) {
                    if q.answer.is_some() {
                        log::debug!("Question {} already answered, skipping", question_id);
                        return Ok(());
                    }
                    q.answer = Some(answer);
                    q.answered_at = Some(Utc::now());
                    return Ok(());
                }
            }
            log::debug!("Question {} not found in any branch, skipping", question_id);
            Ok(())
        })
        .await
    }

    /// Mark a branch done with its finding
    pub async fn complete_branch(
        &self,
        session_id: &str,
        branch_id: &str,
        finding: &str,
    ) -> Result<(), StateError> {
        let session = session_id.to_string();
        let branch_id_owned = branch_id.to_string();
        let finding = finding.to_string();
        self.with_session_mut(session_id, move |state| {
            let branch =
                state
                    .branches
                    .get_mut(&branch_id_owned)
                    .ok_or(StateError::BranchNotFound {
                        session_id: session,
                        branch_id: branch_id_owned.clone(),
                    })?;
            if branch.status == BranchStatus::Done {
                return Err(StateError::BranchAlreadyDone(branch_id_owned.clone()));
            }
            branch.status = BranchStatus::Done;
            branch.finding = Some(finding);
            Ok(())
        })
        .await
    }

    /// First branch in `branch_order` still exploring, or None
    pub async fn get_next_exploring_branch(
        &self,
        session_id: &str,
    ) -> Result<Option<Branch>, StateError> {
        let state = self.get_session(session_id).await?;
        Ok(state.and_then(|s| s.next_exploring_branch().cloned()))
    }

    /// True iff every branch of the session is done
    pub async fn is_session_complete(&self, session_id: &str) -> Result<bool, StateError> {
        match self.get_session(session_id).await? {
            Some(state) => Ok(state.is_complete()),
            None => Err(StateError::SessionNotFound(session_id.to_string())),
        }
    }

    /// Remove the in-memory entry and the persistence file
    pub async fn delete_session(&self, session_id: &str) -> Result<(), StateError> {
        validate_session_id(session_id)?;
        let mut cache = self.cache.lock().await;
        cache.remove(session_id);

        let path = self.state_path(session_id);
        if path.exists() {
            std::fs::remove_file(&path)
                .map_err(|e| StateError::Storage(format!("Failed to delete {:?}: {}", path, e)))?;
        }
        log::info!("Deleted brainstorm session {}", session_id);
        Ok(())
    }

    /// Enumerate persisted session ids
    pub async fn list(&self) -> Result<Vec<String>, StateError> {
        list_json_stems(&self.state_dir).map_err(StateError::Storage)
    }

    /// Directory this store persists into
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> BrainstormStore {
        BrainstormStore::new(dir.path())
    }

    fn branches(n: usize) -> Vec<(String, String)> {
        (1..=n)
            .map(|i| (format!("branch{}", i), format!("Scope {}", i)))
            .collect()
    }

    fn question(id: &str) -> NewBranchQuestion {
        NewBranchQuestion {
            id: id.to_string(),
            question_type: QuestionType::AskText,
            text: "Which services?".to_string(),
            config: json!({"question": "Which services?"}),
        }
    }

    #[tokio::test]
    async fn test_create_and_reload() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .create_session("ses_persist1", "Add healthcheck", &branches(2))
            .await
            .unwrap();

        // A second store over the same directory sees the persisted file
        let other = BrainstormStore::new(dir.path());
        let state = other.get_session("ses_persist1").await.unwrap().unwrap();
        assert_eq!(state.request, "Add healthcheck");
        assert_eq!(state.branch_order, vec!["branch1", "branch2"]);
        assert_eq!(other.list().await.unwrap(), vec!["ses_persist1"]);
    }

    #[tokio::test]
    async fn test_create_duplicate_fails() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .create_session("ses_dup", "r", &branches(1))
            .await
            .unwrap();
        let err = store
            .create_session("ses_dup", "r", &branches(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::SessionAlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_record_answer_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .create_session("ses_idem", "r", &branches(1))
            .await
            .unwrap();
        store
            .add_question_to_branch("ses_idem", "branch1", question("q_one"))
            .await
            .unwrap();

        store
            .record_answer("ses_idem", "q_one", json!({"text": "first"}))
            .await
            .unwrap();
        store
            .record_answer("ses_idem", "q_one", json!({"text": "second"}))
            .await
            .unwrap();
        // Unknown question is a silent no-op too
        store
            .record_answer("ses_idem", "q_ghost", json!({"text": "x"}))
            .await
            .unwrap();

        let state = store.get_session("ses_idem").await.unwrap().unwrap();
        let q = &state.branches["branch1"].questions[0];
        assert_eq!(q.answer, Some(json!({"text": "first"})));
        assert!(q.answered_at.is_some());
    }

    #[tokio::test]
    async fn test_done_branch_rejects_mutation() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .create_session("ses_done", "r", &branches(1))
            .await
            .unwrap();
        store
            .complete_branch("ses_done", "branch1", "the finding")
            .await
            .unwrap();

        let err = store
            .add_question_to_branch("ses_done", "branch1", question("q_late"))
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::BranchAlreadyDone(_)));

        let err = store
            .complete_branch("ses_done", "branch1", "another finding")
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::BranchAlreadyDone(_)));

        // Finding and questions are untouched
        let state = store.get_session("ses_done").await.unwrap().unwrap();
        assert_eq!(
            state.branches["branch1"].finding.as_deref(),
            Some("the finding")
        );
        assert!(state.branches["branch1"].questions.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_branch_and_session() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .create_session("ses_known", "r", &branches(1))
            .await
            .unwrap();

        let err = store
            .add_question_to_branch("ses_known", "ghost", question("q_x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::BranchNotFound { .. }));

        let err = store
            .set_browser_session_id("ses_ghost", "ses_b")
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::SessionNotFound(_)));

        assert!(store.get_session("ses_ghost").await.unwrap().is_none());
        assert!(store.is_session_complete("ses_ghost").await.is_err());
    }

    #[tokio::test]
    async fn test_next_exploring_and_completion() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .create_session("ses_explore", "r", &branches(3))
            .await
            .unwrap();

        let next = store
            .get_next_exploring_branch("ses_explore")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.id, "branch1");

        store
            .complete_branch("ses_explore", "branch1", "f1")
            .await
            .unwrap();
        let next = store
            .get_next_exploring_branch("ses_explore")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.id, "branch2");
        assert!(!store.is_session_complete("ses_explore").await.unwrap());

        store
            .complete_branch("ses_explore", "branch2", "f2")
            .await
            .unwrap();
        store
            .complete_branch("ses_explore", "branch3", "f3")
            .await
            .unwrap();
        assert!(store
            .get_next_exploring_branch("ses_explore")
            .await
            .unwrap()
            .is_none());
        assert!(store.is_session_complete("ses_explore").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_session_removes_file() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .create_session("ses_del", "r", &branches(1))
            .await
            .unwrap();
        assert!(dir.path().join("ses_del.json").exists());

        store.delete_session("ses_del").await.unwrap();
        assert!(!dir.path().join("ses_del.json").exists());
        assert!(store.get_session("ses_del").await.unwrap().is_none());

        // Deleting again is fine
        store.delete_session("ses_del").await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_answers_are_all_persisted() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(BrainstormStore::new(dir.path()));
        store
            .create_session("ses_conc", "r", &branches(5))
            .await
            .unwrap();
        for i in 1..=5 {
            store
                .add_question_to_branch(
                    "ses_conc",
                    &format!("branch{}", i),
                    question(&format!("q_concurrent_{}", i)),
                )
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for i in 1..=5 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .record_answer(
                        "ses_conc",
                        &format!("q_concurrent_{}", i),
                        json!({"text": format!("Answer {}", i)}),
                    )
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // Re-read from disk through a fresh store: every answer must be there
        let fresh = BrainstormStore::new(dir.path());
        let state = fresh.get_session("ses_conc").await.unwrap().unwrap();
        for i in 1..=5 {
            let q = &state.branches[&format!("branch{}", i)].questions[0];
            assert_eq!(
                q.answer,
                Some(json!({"text": format!("Answer {}", i)})),
                "branch{} lost its answer",
                i
            );
            assert!(q.answered_at.is_some());
        }
    }

    #[tokio::test]
    async fn test_updated_at_refreshes_on_mutation() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .create_session("ses_upd", "r", &branches(1))
            .await
            .unwrap();
        let before = store
            .get_session("ses_upd")
            .await
            .unwrap()
            .unwrap()
            .updated_at;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store
            .set_browser_session_id("ses_upd", "ses_live")
            .await
            .unwrap();

        let after = store.get_session("ses_upd").await.unwrap().unwrap();
        assert!(after.updated_at > before);
        assert_eq!(after.browser_session_id.as_deref(), Some("ses_live"));
    }
}
