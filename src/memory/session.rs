//! Session tracking and project-hint driven prefetch.
//!
//! Sessions are transient: an event log plus a `project_hint` with a
//! confidence in [0, 1]. Hints only move monotonically upward unless
//! forced. When a hint's confidence crosses the prefetch threshold the
//! session manager reports a warm-up request; the caller runs it in the
//! background so user queries are never blocked.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::config::ProjectConfig;
use crate::error::{OrchestratorError, Result};

/// Bound on retained command events per session.
const MAX_EVENTS: usize = 200;

#[derive(Debug, Clone)]
pub struct CommandEvent {
    pub command: String,
    pub cwd: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ProjectHint {
    pub project_id: String,
    pub confidence: f64,
    pub source: &'static str,
}

#[derive(Debug)]
struct Session {
    started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    hint: Option<ProjectHint>,
    events: Vec<CommandEvent>,
    prefetched: HashSet<String>,
}

/// Raised when a hint crosses the prefetch threshold for a project that
/// has not been warmed in this session yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmupRequest {
    pub project_id: String,
}

pub struct SessionManager {
    sessions: Mutex<HashMap<String, Session>>,
    prefetch_threshold: f64,
}

impl SessionManager {
    pub fn new(config: &ProjectConfig) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            prefetch_threshold: config.prefetch_threshold,
        }
    }

    pub fn start_session(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().expect("session lock");
        let now = Utc::now();
        sessions.insert(
            session_id.to_string(),
            Session {
                started_at: now,
                updated_at: now,
                hint: None,
                events: Vec::new(),
                prefetched: HashSet::new(),
            },
        );
        tracing::info!(session_id, "session started");
    }

    pub fn end_session(&self, session_id: &str) -> Result<Value> {
        let mut sessions = self.sessions.lock().expect("session lock");
        let session = sessions
            .remove(session_id)
            .ok_or_else(|| OrchestratorError::NotFound(session_id.to_string()))?;
        tracing::info!(session_id, events = session.events.len(), "session ended");
        Ok(json!({
            "session_id": session_id,
            "started_at": session.started_at.to_rfc3339(),
            "updated_at": session.updated_at.to_rfc3339(),
            "event_count": session.events.len(),
            "project_hint": session.hint.as_ref().map(|h| h.project_id.clone()),
        }))
    }

    /// Record a command event and update the project hint. Returns a
    /// warm-up request when the hint newly crosses the prefetch threshold.
    pub fn add_command(
        &self,
        session_id: &str,
        command: &str,
        cwd: Option<&str>,
        project: Option<&str>,
    ) -> Result<Option<WarmupRequest>> {
        let mut sessions = self.sessions.lock().expect("session lock");
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| OrchestratorError::NotFound(session_id.to_string()))?;

        session.updated_at = Utc::now();
        session.events.push(CommandEvent {
            command: command.to_string(),
            cwd: cwd.map(String::from),
            at: session.updated_at,
        });
        if session.events.len() > MAX_EVENTS {
            let excess = session.events.len() - MAX_EVENTS;
            session.events.drain(..excess);
        }

        let inferred = infer_hint(project, cwd);
        let Some(hint) = inferred else {
            return Ok(None);
        };

        // Higher confidence wins; equal or lower is ignored.
        let current_confidence = session.hint.as_ref().map(|h| h.confidence).unwrap_or(0.0);
        if hint.confidence <= current_confidence
            && session.hint.as_ref().map(|h| h.project_id.as_str())
                == Some(hint.project_id.as_str())
        {
            return Ok(None);
        }
        if hint.confidence < current_confidence {
            return Ok(None);
        }

        tracing::debug!(
            session_id,
            project_id = %hint.project_id,
            confidence = hint.confidence,
            source = hint.source,
            "project hint updated"
        );
        let crosses = hint.confidence >= self.prefetch_threshold
            && !session.prefetched.contains(&hint.project_id);
        let request = crosses.then(|| {
            session.prefetched.insert(hint.project_id.clone());
            WarmupRequest {
                project_id: hint.project_id.clone(),
            }
        });
        session.hint = Some(hint);
        Ok(request)
    }

    pub fn project_hint(&self, session_id: &str) -> Result<Option<(String, f64)>> {
        let sessions = self.sessions.lock().expect("session lock");
        let session = sessions
            .get(session_id)
            .ok_or_else(|| OrchestratorError::NotFound(session_id.to_string()))?;
        Ok(session
            .hint
            .as_ref()
            .map(|h| (h.project_id.clone(), h.confidence)))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().expect("session lock").len()
    }
}

/// Explicit project beats a cwd-derived guess.
fn infer_hint(project: Option<&str>, cwd: Option<&str>) -> Option<ProjectHint> {
    if let Some(project) = project.filter(|p| !p.trim().is_empty()) {
        return Some(ProjectHint {
            project_id: project.trim().to_string(),
            confidence: 0.95,
            source: "explicit",
        });
    }
    let cwd = cwd?.trim().trim_end_matches(['/', '\\']);
    let leaf = cwd.rsplit(['/', '\\']).next()?.trim();
    if leaf.is_empty() {
        return None;
    }
    Some(ProjectHint {
        project_id: leaf.to_string(),
        confidence: 0.6,
        source: "cwd",
    })
}
