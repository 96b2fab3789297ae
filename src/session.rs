use anyhow::{Result, anyhow};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{self, SaltString},
};
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::models::{Role, User};

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("Password hashing failed: {}", e))?
        .to_string();

    Ok(hash)
}

/// `Ok(false)` for a wrong password, `Err` only when the stored hash is unreadable
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| anyhow!("Stored password hash is invalid: {}", e))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(e) => Err(anyhow!("Password verification failed: {}", e)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Unauthenticated,
    Authenticated { role: Role },
    Terminated,
}

/// Who is calling, passed explicitly to every handler that needs it
#[derive(Debug, Clone, Serialize)]
pub struct SessionContext {
    pub session_id: Uuid,
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
    pub classes: Vec<String>,
    pub register_no: Option<String>,
    #[serde(flatten)]
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
}

impl SessionContext {
    pub fn unauthenticated() -> Self {
        Self {
            session_id: Uuid::nil(),
            user_id: None,
            email: None,
            classes: Vec::new(),
            register_no: None,
            state: SessionState::Unauthenticated,
            created_at: Utc::now(),
        }
    }

    fn for_user(user: &User) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_id: Some(user.id),
            email: Some(user.email.clone()),
            classes: user.classes.clone(),
            register_no: user.register_no.clone(),
            state: SessionState::Authenticated { role: user.role },
            created_at: Utc::now(),
        }
    }

    pub fn role(&self) -> Option<Role> {
        match self.state {
            SessionState::Authenticated { role } => Some(role),
            SessionState::Unauthenticated | SessionState::Terminated => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.role().is_some()
    }

    pub fn is_teacher(&self) -> bool {
        self.role() == Some(Role::Teacher)
    }

    /// Teachers see every register number; students only the one bound to their account
    pub fn can_view_register(&self, register_no: &str) -> bool {
        match self.role() {
            Some(Role::Teacher) => true,
            Some(Role::Student) => self.register_no.as_deref() == Some(register_no),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<Uuid, SessionContext>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<Uuid, SessionContext>>> {
        self.sessions
            .lock()
            .map_err(|_| anyhow!("Session store lock poisoned"))
    }

    pub fn create(&self, user: &User) -> Result<SessionContext> {
        let context = SessionContext::for_user(user);
        self.lock()?.insert(context.session_id, context.clone());
        Ok(context)
    }

    /// Unknown ids resolve to an unauthenticated context rather than an error
    pub fn resolve(&self, session_id: Uuid) -> Result<SessionContext> {
        Ok(self
            .lock()?
            .get(&session_id)
            .cloned()
            .unwrap_or_else(SessionContext::unauthenticated))
    }

    /// Returns false when the session was unknown or already terminated
    pub fn terminate(&self, session_id: Uuid) -> Result<bool> {
        let mut sessions = self.lock()?;
        match sessions.get_mut(&session_id) {
            Some(context) if context.state != SessionState::Terminated => {
                context.state = SessionState::Terminated;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role, register_no: Option<&str>) -> User {
        User {
            id: Uuid::new_v4(),
            email: "someone@school.test".to_string(),
            password_hash: String::new(),
            role,
            classes: vec!["10A".to_string()],
            register_no: register_no.map(str::to_string),
        }
    }

    #[test]
    fn test_password_round_trip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("wrong horse", &hash).unwrap());
        assert!(verify_password("anything", "not-a-hash").is_err());
    }

    #[test]
    fn test_session_lifecycle() {
        let store = SessionStore::new();
        let context = store.create(&user(Role::Teacher, None)).unwrap();

        assert!(context.is_teacher());

        let resolved = store.resolve(context.session_id).unwrap();
        assert_eq!(resolved.state, SessionState::Authenticated { role: Role::Teacher });

        assert!(store.terminate(context.session_id).unwrap());
        assert!(!store.terminate(context.session_id).unwrap());
        let terminated = store.resolve(context.session_id).unwrap();
        assert_eq!(terminated.state, SessionState::Terminated);
        assert!(!terminated.is_authenticated());
    }

    #[test]
    fn test_unknown_session_is_unauthenticated() {
        let store = SessionStore::new();
        let context = store.resolve(Uuid::new_v4()).unwrap();

        assert_eq!(context.state, SessionState::Unauthenticated);
        assert!(!context.can_view_register("REG001"));
    }

    #[test]
    fn test_register_visibility() {
        let store = SessionStore::new();
        let student = store.create(&user(Role::Student, Some("REG001"))).unwrap();
        let teacher = store.create(&user(Role::Teacher, None)).unwrap();

        assert!(student.can_view_register("REG001"));
        assert!(!student.can_view_register("REG002"));
        assert!(teacher.can_view_register("REG002"));
    }

    #[test]
    fn test_context_serializes_state_inline() {
        let store = SessionStore::new();
        let context = store.create(&user(Role::Student, Some("REG001"))).unwrap();

        let value = serde_json::to_value(&context).unwrap();
        assert_eq!(value["state"], "authenticated");
        assert_eq!(value["role"], "student");
        assert_eq!(value["register_no"], "REG001");
    }
}
