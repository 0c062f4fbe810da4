// Authentication module
// Credential storage, the remote auth endpoint and single-flight refresh

mod coordinator;
mod credentials;
mod refresh;
mod types;

pub use coordinator::{RefreshCoordinator, SharedRefresh};
pub use credentials::{CredentialStore, MemoryCredentialStore, SqliteCredentialStore};
pub use refresh::{user_agent, AuthEndpoint, HttpAuthEndpoint};
pub use types::{StoredSession, TokenPair};
