// Route guard
// Gates protected views on authentication and role

use crate::auth::{Role, SessionManager};

/// Outcome of a guard check
#[derive(Debug, Clone, PartialEq)]
pub enum GuardDecision {
    Allow,
    Redirect(String),
}

/// Decides whether the current session may render a protected view
#[derive(Clone)]
pub struct RouteGuard {
    session: SessionManager,
}

impl RouteGuard {
    pub fn new(session: SessionManager) -> Self {
        Self { session }
    }

    /// Check access to a view.
    ///
    /// `None` admits any signed-in user. `Some(roles)` admits only those
    /// roles; an empty set admits nobody.
    pub async fn check(&self, allowed_roles: Option<&[Role]>) -> GuardDecision {
        let state = self.session.state().await;
        let routes = &self.session.config().routes;

        if !state.is_authenticated() {
            return GuardDecision::Redirect(routes.login.clone());
        }

        if let Some(allowed) = allowed_roles {
            let permitted = state.role.map(|r| allowed.contains(&r)).unwrap_or(false);
            if !permitted {
                tracing::debug!(role = ?state.role, allowed = ?allowed, "Role not permitted");
                return GuardDecision::Redirect(routes.unauthorized.clone());
            }
        }

        GuardDecision::Allow
    }

    /// Check access and perform the redirect when denied; true when allowed
    pub async fn enforce(&self, allowed_roles: Option<&[Role]>) -> bool {
        match self.check(allowed_roles).await {
            GuardDecision::Allow => true,
            GuardDecision::Redirect(to) => {
                self.session.navigate(&to);
                false
            }
        }
    }
}
