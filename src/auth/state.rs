// In-memory session state

use chrono::{DateTime, Utc};

use super::claims::AccessClaims;
use super::types::{PersistedSession, Role, User};

/// Snapshot of the session as seen by collaborators.
///
/// Authentication is derived from the token and its claims on every read and
/// is never stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub claims: Option<AccessClaims>,
    pub role: Option<Role>,
    pub user: Option<User>,
    pub loading: bool,
    pub error: Option<String>,
    /// Set after the server accepted a signup; display only
    pub signup_succeeded: bool,
}

impl SessionState {
    pub(crate) fn from_persisted(record: PersistedSession) -> Self {
        let mut state = Self::default();
        state.apply(record);
        state
    }

    /// True only with a token, its claims, and an expiry after `now`
    pub fn is_authenticated_at(&self, now: DateTime<Utc>) -> bool {
        match (&self.access_token, &self.claims) {
            (Some(_), Some(claims)) => !claims.is_expired_at(now),
            _ => false,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated_at(Utc::now())
    }

    /// Replace the credential fields with a complete record
    pub(crate) fn apply(&mut self, record: PersistedSession) {
        self.access_token = Some(record.access_token);
        self.refresh_token = record.refresh_token;
        self.claims = Some(record.claims);
        self.role = record.role;
        self.user = record.user;
    }

    /// Drop every credential and profile field
    pub(crate) fn clear_credentials(&mut self) {
        self.access_token = None;
        self.refresh_token = None;
        self.claims = None;
        self.role = None;
        self.user = None;
        self.loading = false;
    }

    /// The persistable part of the state, if a token is held
    pub(crate) fn to_persisted(&self) -> Option<PersistedSession> {
        match (&self.access_token, &self.claims) {
            (Some(access_token), Some(claims)) => Some(PersistedSession {
                access_token: access_token.clone(),
                refresh_token: self.refresh_token.clone(),
                claims: claims.clone(),
                role: self.role,
                user: self.user.clone(),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn claims(exp: i64) -> AccessClaims {
        AccessClaims {
            token_type: "access".to_string(),
            exp,
            iat: exp - 300,
            jti: "j".to_string(),
            user_id: 1,
        }
    }

    #[test]
    fn test_empty_state_is_unauthenticated() {
        let state = SessionState::default();
        assert!(!state.is_authenticated());
        assert!(state.to_persisted().is_none());
    }

    #[test]
    fn test_token_without_claims_is_unauthenticated() {
        let state = SessionState {
            access_token: Some("token".to_string()),
            ..Default::default()
        };
        assert!(!state.is_authenticated());
    }

    #[test]
    fn test_authentication_lapses_with_time() {
        let now = Utc::now();
        let state = SessionState::from_persisted(PersistedSession {
            access_token: "token".to_string(),
            refresh_token: None,
            claims: claims((now + Duration::seconds(60)).timestamp()),
            role: Some(Role::Admin),
            user: None,
        });

        assert!(state.is_authenticated_at(now));
        assert!(!state.is_authenticated_at(now + Duration::seconds(61)));
    }

    #[test]
    fn test_clear_credentials_keeps_error() {
        let mut state = SessionState::from_persisted(PersistedSession {
            access_token: "token".to_string(),
            refresh_token: Some("refresh".to_string()),
            claims: claims(Utc::now().timestamp() + 60),
            role: Some(Role::Student),
            user: None,
        });
        state.error = Some("boom".to_string());
        state.loading = true;

        state.clear_credentials();

        assert_eq!(state.access_token, None);
        assert_eq!(state.refresh_token, None);
        assert_eq!(state.role, None);
        assert!(!state.loading);
        assert_eq!(state.error.as_deref(), Some("boom"));
    }

    proptest! {
        #[test]
        fn prop_authenticated_implies_token_and_future_expiry(
            has_token in any::<bool>(),
            has_claims in any::<bool>(),
            exp_offset in -10_000i64..10_000,
        ) {
            let now = Utc::now();
            let state = SessionState {
                access_token: has_token.then(|| "token".to_string()),
                claims: has_claims.then(|| claims(now.timestamp() + exp_offset)),
                ..Default::default()
            };

            if state.is_authenticated_at(now) {
                prop_assert!(state.access_token.is_some());
                prop_assert!(state.claims.as_ref().unwrap().exp > now.timestamp());
            }
        }
    }
}
