//! Live session store
//!
//! Owns every open browser session: its question queue, its WebSocket
//! connection state, and the waiters blocked on answers. Each session runs
//! its own HTTP+WebSocket server on an ephemeral port; the browser renders
//! pushed questions and posts answers back over the socket.

pub mod page;
mod server;

pub use server::ShutdownFlag;

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::browser;
use crate::models::{
    new_id, GetAnswerOutput, GetNextAnswerOutput, OkOutput, Question, QuestionStatus,
    QuestionSummary, QuestionType, ServerFrame, StartSessionOutput,
};
use crate::waiters::WaiterRegistry;

/// Default wait for blocking reads (5 minutes)
pub const DEFAULT_BLOCK_TIMEOUT_MS: u64 = 300_000;

/// Error types for session store operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Operation on an unknown session id
    SessionNotFound(String),
    /// The platform browser could not be launched; session creation is
    /// rolled back
    BrowserOpenFailed(String),
    /// The per-session server could not bind its port
    Bind(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::SessionNotFound(id) => write!(f, "Session '{}' not found", id),
            SessionError::BrowserOpenFailed(msg) => {
                write!(f, "Failed to open browser: {}", msg)
            }
            SessionError::Bind(msg) => write!(f, "Failed to bind session server: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}

/// Payload delivered to question-scoped waiters
#[derive(Debug, Clone)]
pub enum AnswerEvent {
    Answered(Value),
    Cancelled,
}

/// Payload delivered to session-scoped waiters
#[derive(Debug, Clone)]
pub struct SessionAnswer {
    pub question_id: String,
    pub question_type: QuestionType,
    pub response: Value,
}

/// Projection of a live session for `list_sessions`
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub url: String,
    pub port: u16,
    pub ws_connected: bool,
    pub question_count: usize,
    pub created_at: DateTime<Utc>,
}

/// A live browser session
pub struct Session {
    pub id: String,
    pub title: Option<String>,
    pub port: u16,
    pub url: String,
    /// Questions in insertion order
    questions: Vec<Question>,
    /// Sender feeding the attached WebSocket client, if any
    ws_tx: Option<tokio::sync::mpsc::UnboundedSender<ServerFrame>>,
    ws_connected: bool,
    /// Stops this session's HTTP server
    shutdown: ShutdownFlag,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct StoreInner {
    sessions: HashMap<String, Session>,
    /// Question id to owning session id
    question_index: HashMap<String, String>,
}

/// Store of live sessions, shared between the tool surface and the
/// per-session WebSocket handlers
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Mutex<StoreInner>>,
    question_waiters: Arc<WaiterRegistry<AnswerEvent>>,
    session_waiters: Arc<WaiterRegistry<SessionAnswer>>,
    skip_browser: bool,
}

impl SessionStore {
    pub fn new(skip_browser: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner::default())),
            question_waiters: Arc::new(WaiterRegistry::new()),
            session_waiters: Arc::new(WaiterRegistry::new()),
            skip_browser,
        }
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    /// Create a session: bind an ephemeral port, start its server, insert
    /// any seed questions, and open the browser at the session URL.
    ///
    /// A browser launch failure rolls everything back and fails with
    /// `BrowserOpenFailed`.
    pub async fn start_session(
        &self,
        title: Option<String>,
        seed_questions: Vec<(QuestionType, Value)>,
    ) -> Result<StartSessionOutput, SessionError> {
        let session_id = new_id("ses_");

        let (port, shutdown) = server::spawn_session_server(self.clone(), session_id.clone())
            .await
            .map_err(SessionError::Bind)?;
        let url = format!("http://localhost:{}", port);

        let mut question_ids = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            let mut session = Session {
                id: session_id.clone(),
                title,
                port,
                url: url.clone(),
                questions: Vec::new(),
                ws_tx: None,
                ws_connected: false,
                shutdown: shutdown.clone(),
                created_at: Utc::now(),
            };
            for (question_type, config) in seed_questions {
                let question = Question::new(&session_id, question_type, config);
                question_ids.push(question.id.clone());
                inner
                    .question_index
                    .insert(question.id.clone(), session_id.clone());
                session.questions.push(question);
            }
            inner.sessions.insert(session_id.clone(), session);
        }

        if !self.skip_browser {
            if let Err(e) = browser::open_url(&url) {
                log::error!("Browser launch failed, rolling back session: {}", e);
                let mut inner = self.inner.lock().unwrap();
                if let Some(session) = inner.sessions.remove(&session_id) {
                    for question in &session.questions {
                        inner.question_index.remove(&question.id);
                    }
                }
                shutdown.request();
                return Err(SessionError::BrowserOpenFailed(e));
            }
        }

        log::info!("Started session {} at {}", session_id, url);
        Ok(StartSessionOutput {
            session_id,
            url,
            question_ids: if question_ids.is_empty() {
                None
            } else {
                Some(question_ids)
            },
        })
    }

    /// Tear down a session: notify the browser, stop the server, unlink its
    /// questions, and drop its waiters. Unknown ids yield `{ok:false}`.
    pub fn end_session(&self, session_id: &str) -> OkOutput {
        let removed = {
            let mut inner = self.inner.lock().unwrap();
            match inner.sessions.remove(session_id) {
                Some(session) => {
                    for question in &session.questions {
                        inner.question_index.remove(&question.id);
                    }
                    Some(session)
                }
                None => None,
            }
        };

        let session = match removed {
            Some(s) => s,
            None => return OkOutput { ok: false },
        };

        if let Some(tx) = &session.ws_tx {
            let _ = tx.send(ServerFrame::End);
        }
        session.shutdown.request();

        for question in &session.questions {
            self.question_waiters.clear(&question.id);
        }
        self.session_waiters.clear(session_id);

        log::info!("Ended session {}", session_id);
        OkOutput { ok: true }
    }

    // =========================================================================
    // Questions
    // =========================================================================

    /// Push a question to the session's browser.
    ///
    /// If no client is attached, a best-effort browser (re)open is attempted
    /// in the background; the question waits in the queue either way and is
    /// replayed on connect.
    pub fn push_question(
        &self,
        session_id: &str,
        question_type: QuestionType,
        config: Value,
    ) -> Result<String, SessionError> {
        let (question_id, reopen_url) = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.sessions.contains_key(session_id) {
                return Err(SessionError::SessionNotFound(session_id.to_string()));
            }
            let question = Question::new(session_id, question_type, config);
            inner
                .question_index
                .insert(question.id.clone(), session_id.to_string());

            let session = inner
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;
            let question_id = question.id.clone();
            let frame = ServerFrame::Question {
                id: question.id.clone(),
                question_type: question.question_type,
                config: question.config.clone(),
            };
            session.questions.push(question);

            let reopen_url = match &session.ws_tx {
                Some(tx) => {
                    let _ = tx.send(frame);
                    None
                }
                None if !self.skip_browser => Some(session.url.clone()),
                None => None,
            };
            (question_id, reopen_url)
        };

        if let Some(url) = reopen_url {
            // Client not attached; try to bring the browser back, ignoring
            // failures
            tokio::spawn(async move {
                if let Err(e) = browser::open_url(&url) {
                    log::debug!("Browser reopen attempt failed: {}", e);
                }
            });
        }

        log::debug!("Pushed question {} to session {}", question_id, session_id);
        Ok(question_id)
    }

    /// Cancel a pending question, unblocking its waiters and removing it
    /// from the browser. `{ok:false}` if unknown or not pending.
    pub fn cancel_question(&self, question_id: &str) -> OkOutput {
        {
            let mut inner = self.inner.lock().unwrap();
            let session_id = match inner.question_index.get(question_id) {
                Some(id) => id.clone(),
                None => return OkOutput { ok: false },
            };
            let session = match inner.sessions.get_mut(&session_id) {
                Some(s) => s,
                None => return OkOutput { ok: false },
            };
            let question = match session.questions.iter_mut().find(|q| q.id == question_id) {
                Some(q) => q,
                None => return OkOutput { ok: false },
            };
            if question.status != QuestionStatus::Pending {
                return OkOutput { ok: false };
            }
            question.status = QuestionStatus::Cancelled;
            if let Some(tx) = &session.ws_tx {
                let _ = tx.send(ServerFrame::Cancel {
                    id: question_id.to_string(),
                });
            }
        }

        self.question_waiters
            .notify_all(question_id, AnswerEvent::Cancelled);
        log::debug!("Cancelled question {}", question_id);
        OkOutput { ok: true }
    }

    /// All questions (optionally scoped to one session), newest first
    pub fn list_questions(&self, session_id: Option<&str>) -> Vec<QuestionSummary> {
        let inner = self.inner.lock().unwrap();
        let mut summaries: Vec<QuestionSummary> = inner
            .sessions
            .values()
            .filter(|s| session_id.map_or(true, |id| s.id == id))
            .flat_map(|s| s.questions.iter().map(QuestionSummary::from))
            .collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }

    // =========================================================================
    // Blocking reads
    // =========================================================================

    /// Read one question's answer, optionally blocking until it arrives.
    ///
    /// Terminal states resolve immediately; a blocking wait that elapses
    /// moves the question to `timeout`.
    pub async fn get_answer(
        &self,
        question_id: &str,
        block: bool,
        timeout_ms: Option<u64>,
    ) -> GetAnswerOutput {
        let (waiter_id, mut rx) = {
            let inner = self.inner.lock().unwrap();
            let session_id = match inner.question_index.get(question_id) {
                Some(id) => id.clone(),
                // Unknown question maps to cancelled
                None => return GetAnswerOutput::not_completed("cancelled"),
            };
            let question = inner
                .sessions
                .get(&session_id)
                .and_then(|s| s.questions.iter().find(|q| q.id == question_id));

            match question {
                None => return GetAnswerOutput::not_completed("cancelled"),
                Some(q) => match q.status {
                    QuestionStatus::Answered => {
                        return GetAnswerOutput::answered(
                            q.response.clone().unwrap_or(Value::Null),
                        )
                    }
                    QuestionStatus::Cancelled => {
                        return GetAnswerOutput::not_completed("cancelled")
                    }
                    QuestionStatus::Timeout => return GetAnswerOutput::not_completed("timeout"),
                    QuestionStatus::Pending => {
                        if !block {
                            return GetAnswerOutput::not_completed("pending");
                        }
                        // Register before releasing the lock so an answer
                        // arriving right after cannot be missed
                        self.question_waiters.register(question_id)
                    }
                },
            }
        };

        let timeout = Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_BLOCK_TIMEOUT_MS));
        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(AnswerEvent::Answered(response))) => GetAnswerOutput::answered(response),
            Ok(Ok(AnswerEvent::Cancelled)) => GetAnswerOutput::not_completed("cancelled"),
            // Waiters torn down with their session resolve as cancelled
            Ok(Err(_)) => GetAnswerOutput::not_completed("cancelled"),
            Err(_) => {
                self.question_waiters.remove(question_id, waiter_id);
                // The answer may have landed in the window between the timer
                // firing and the waiter being removed
                if let Ok(event) = rx.try_recv() {
                    return match event {
                        AnswerEvent::Answered(response) => GetAnswerOutput::answered(response),
                        AnswerEvent::Cancelled => GetAnswerOutput::not_completed("cancelled"),
                    };
                }
                self.mark_question_timeout(question_id);
                GetAnswerOutput::not_completed("timeout")
            }
        }
    }

    /// Read the next unretrieved answer on a session, optionally blocking.
    ///
    /// Concurrent blocking callers each receive a distinct answer, in the
    /// order answers arrive.
    pub async fn get_next_answer(
        &self,
        session_id: &str,
        block: bool,
        timeout_ms: Option<u64>,
    ) -> GetNextAnswerOutput {
        let (waiter_id, mut rx) = {
            let mut inner = self.inner.lock().unwrap();
            let session = match inner.sessions.get_mut(session_id) {
                Some(s) => s,
                None => return GetNextAnswerOutput::not_completed("none_pending"),
            };

            if let Some(q) = session
                .questions
                .iter_mut()
                .find(|q| q.status == QuestionStatus::Answered && !q.retrieved)
            {
                q.retrieved = true;
                return GetNextAnswerOutput::answered(
                    q.id.clone(),
                    q.question_type,
                    q.response.clone().unwrap_or(Value::Null),
                );
            }

            if !session
                .questions
                .iter()
                .any(|q| q.status == QuestionStatus::Pending)
            {
                return GetNextAnswerOutput::not_completed("none_pending");
            }
            if !block {
                return GetNextAnswerOutput::not_completed("pending");
            }
            self.session_waiters.register(session_id)
        };

        let timeout = Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_BLOCK_TIMEOUT_MS));
        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(answer)) => GetNextAnswerOutput::answered(
                answer.question_id,
                answer.question_type,
                answer.response,
            ),
            Ok(Err(_)) => GetNextAnswerOutput::not_completed("cancelled"),
            Err(_) => {
                self.session_waiters.remove(session_id, waiter_id);
                if let Ok(answer) = rx.try_recv() {
                    return GetNextAnswerOutput::answered(
                        answer.question_id,
                        answer.question_type,
                        answer.response,
                    );
                }
                GetNextAnswerOutput::not_completed("timeout")
            }
        }
    }

    fn mark_question_timeout(&self, question_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(session_id) = inner.question_index.get(question_id).cloned() {
            if let Some(session) = inner.sessions.get_mut(&session_id) {
                if let Some(q) = session
                    .questions
                    .iter_mut()
                    .find(|q| q.id == question_id && q.status == QuestionStatus::Pending)
                {
                    q.status = QuestionStatus::Timeout;
                    log::debug!("Question {} timed out", question_id);
                }
            }
        }
    }

    // =========================================================================
    // WebSocket transport hooks
    // =========================================================================

    /// Attach the (single) WebSocket client for a session and replay every
    /// pending question in insertion order. Returns false if the session is
    /// unknown.
    pub(crate) fn attach_client(
        &self,
        session_id: &str,
        tx: tokio::sync::mpsc::UnboundedSender<ServerFrame>,
    ) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let session = match inner.sessions.get_mut(session_id) {
            Some(s) => s,
            None => return false,
        };

        for question in session
            .questions
            .iter()
            .filter(|q| q.status == QuestionStatus::Pending)
        {
            let _ = tx.send(ServerFrame::Question {
                id: question.id.clone(),
                question_type: question.question_type,
                config: question.config.clone(),
            });
        }

        session.ws_tx = Some(tx);
        session.ws_connected = true;
        log::info!("WebSocket client attached to session {}", session_id);
        true
    }

    /// Drop the WebSocket client. Pending questions stay pending.
    pub(crate) fn detach_client(&self, session_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(session) = inner.sessions.get_mut(session_id) {
            session.ws_tx = None;
            session.ws_connected = false;
            log::info!("WebSocket client detached from session {}", session_id);
        }
    }

    /// Record a `response` frame from the browser.
    ///
    /// Ignored unless the question exists and is pending. Fans the answer
    /// out to every question-scoped waiter and hands it to the oldest
    /// session-scoped waiter (which marks it retrieved).
    pub fn record_response(&self, session_id: &str, question_id: &str, answer: Value) {
        let question_type = {
            let mut inner = self.inner.lock().unwrap();
            let session = match inner.sessions.get_mut(session_id) {
                Some(s) => s,
                None => return,
            };
            let question = match session.questions.iter_mut().find(|q| q.id == question_id) {
                Some(q) => q,
                None => {
                    log::debug!("Response for unknown question {}, ignoring", question_id);
                    return;
                }
            };
            if question.status != QuestionStatus::Pending {
                log::debug!(
                    "Response for {} in state {:?}, ignoring",
                    question_id,
                    question.status
                );
                return;
            }
            question.status = QuestionStatus::Answered;
            question.answered_at = Some(Utc::now());
            question.response = Some(answer.clone());

            // Deliver to the oldest session waiter; delivery and the
            // retrieved flag must flip together, under the lock
            let delivered = self.session_waiters.notify_first(
                session_id,
                SessionAnswer {
                    question_id: question_id.to_string(),
                    question_type: question.question_type,
                    response: answer.clone(),
                },
            );
            if delivered {
                question.retrieved = true;
            }
            question.question_type
        };

        self.question_waiters
            .notify_all(question_id, AnswerEvent::Answered(answer));
        log::debug!(
            "Recorded {:?} response for question {}",
            question_type,
            question_id
        );
    }

    /// Snapshot of every live session, newest first
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        let inner = self.inner.lock().unwrap();
        let mut sessions: Vec<SessionInfo> = inner
            .sessions
            .values()
            .map(|s| SessionInfo {
                id: s.id.clone(),
                title: s.title.clone(),
                url: s.url.clone(),
                port: s.port,
                ws_connected: s.ws_connected,
                question_count: s.questions.len(),
                created_at: s.created_at,
            })
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions
    }

    /// URL of a live session, if it exists
    pub fn session_url(&self, session_id: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.sessions.get(session_id).map(|s| s.url.clone())
    }

    /// Whether a WebSocket client is currently attached
    pub fn is_connected(&self, session_id: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .sessions
            .get(session_id)
            .map(|s| s.ws_connected)
            .unwrap_or(false)
    }
}
