// Authentication module
// Manages the session lifecycle: credential exchange, storage, expiry and refresh

mod claims;
mod manager;
mod navigator;
mod refresh;
mod state;
mod store;
mod types;
mod validation;

pub use claims::{decode_access_token, AccessClaims};
pub use manager::SessionManager;
pub use navigator::{HistoryNavigator, LogNavigator, Navigator};
pub use state::SessionState;
pub use store::{MemorySessionStore, SessionStore, SqliteSessionStore};
pub use types::{LoginField, PersistedSession, Role, SignupForm, User};
pub use validation::{is_valid_email, validate_signup, MIN_PASSWORD_LENGTH};
