//! Per-user registration dialog state.
//!
//! Each handle walks `AwaitingName -> AwaitingSite { name } -> done`.
//! Sessions expire after a TTL; input that does not fit the current step is
//! rejected and leaves the session as it was.

use std::time::{Duration, Instant};

use dashmap::{
    mapref::{entry::Entry, one::RefMut},
    DashMap,
};
use thiserror::Error;
use tool_store::SiteId;
use tracing::debug;

/// Default lifetime of an idle registration session (15 minutes).
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(900);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("No registration in progress for {0}")]
    NotStarted(String),

    #[error("Registration for {handle} expects {expected}")]
    UnexpectedInput {
        handle: String,
        expected: &'static str,
    },

    #[error("Name must not be empty")]
    EmptyName,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationStep {
    AwaitingName,
    AwaitingSite { name: String },
}

impl RegistrationStep {
    fn expected(&self) -> &'static str {
        match self {
            RegistrationStep::AwaitingName => "a display name",
            RegistrationStep::AwaitingSite { .. } => "a site choice",
        }
    }
}

#[derive(Debug, Clone)]
struct Session {
    step: RegistrationStep,
    touched_at: Instant,
}

/// Name and site collected by a finished dialog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedRegistration {
    pub handle: String,
    pub name: String,
    pub site_id: SiteId,
}

pub struct RegistrationSessions {
    sessions: DashMap<String, Session>,
    ttl: Duration,
}

impl Default for RegistrationSessions {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistrationSessions {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            ttl: DEFAULT_SESSION_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Start (or restart) a dialog for `handle`
    pub fn start(&self, handle: &str) {
        self.sessions.insert(
            handle.to_string(),
            Session {
                step: RegistrationStep::AwaitingName,
                touched_at: Instant::now(),
            },
        );
        debug!(handle = %handle, "Registration session started");
    }

    /// Current step, if a live session exists
    pub fn step(&self, handle: &str) -> Option<RegistrationStep> {
        let session = self.sessions.get(handle)?;
        if session.touched_at.elapsed() >= self.ttl {
            return None;
        }
        Some(session.step.clone())
    }

    pub fn submit_name(&self, handle: &str, name: &str) -> Result<(), SessionError> {
        let name = name.trim();
        let mut session = self.live_session(handle)?;
        if session.step != RegistrationStep::AwaitingName {
            return Err(SessionError::UnexpectedInput {
                handle: handle.to_string(),
                expected: session.step.expected(),
            });
        }
        if name.is_empty() {
            return Err(SessionError::EmptyName);
        }
        session.step = RegistrationStep::AwaitingSite {
            name: name.to_string(),
        };
        session.touched_at = Instant::now();
        Ok(())
    }

    /// Finish the dialog; the session is removed on success
    pub fn submit_site(
        &self,
        handle: &str,
        site_id: SiteId,
    ) -> Result<CompletedRegistration, SessionError> {
        let name = {
            let session = self.live_session(handle)?;
            match &session.step {
                RegistrationStep::AwaitingSite { name } => name.clone(),
                other => {
                    return Err(SessionError::UnexpectedInput {
                        handle: handle.to_string(),
                        expected: other.expected(),
                    })
                }
            }
        };
        self.sessions.remove(handle);
        Ok(CompletedRegistration {
            handle: handle.to_string(),
            name,
            site_id,
        })
    }

    pub fn cancel(&self, handle: &str) -> bool {
        self.sessions.remove(handle).is_some()
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Drop sessions idle for longer than the TTL
    pub fn evict_expired(&self) {
        let now = Instant::now();
        let ttl = self.ttl;
        self.sessions
            .retain(|_, session| now.duration_since(session.touched_at) < ttl);
    }

    fn live_session(
        &self,
        handle: &str,
    ) -> Result<RefMut<'_, String, Session>, SessionError> {
        match self.sessions.entry(handle.to_string()) {
            Entry::Occupied(entry) if entry.get().touched_at.elapsed() < self.ttl => {
                Ok(entry.into_ref())
            }
            Entry::Occupied(entry) => {
                entry.remove();
                Err(SessionError::NotStarted(handle.to_string()))
            }
            Entry::Vacant(_) => Err(SessionError::NotStarted(handle.to_string())),
        }
    }
}
