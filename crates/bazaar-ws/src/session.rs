#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    Authenticated,
    Closed,
    Rejected,
}

/// One transport connection as seen by the relay.
#[derive(Debug)]
pub struct Session {
    pub conn_id: String,
    pub user_id: Option<i64>,
    /// Bearer token kept for per-action fast verification.
    pub token: Option<String>,
    pub phase: SessionPhase,
}

impl Session {
    pub fn new() -> Self {
        Self {
            conn_id: uuid::Uuid::new_v4().to_string(),
            user_id: None,
            token: None,
            phase: SessionPhase::Connecting,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.phase == SessionPhase::Authenticated && self.user_id.is_some()
    }

    pub(crate) fn authenticate(&mut self, user_id: i64, token: &str) {
        self.user_id = Some(user_id);
        self.token = Some(token.to_string());
        self.phase = SessionPhase::Authenticated;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_sessions_get_unique_ids() {
        let a = Session::new();
        let b = Session::new();
        assert_ne!(a.conn_id, b.conn_id);
        assert_eq!(a.phase, SessionPhase::Connecting);
        assert!(!a.is_authenticated());
    }

    #[test]
    fn authenticate_moves_to_authenticated() {
        let mut session = Session::new();
        session.authenticate(4, "tok");
        assert!(session.is_authenticated());
        assert_eq!(session.token.as_deref(), Some("tok"));
    }
}
