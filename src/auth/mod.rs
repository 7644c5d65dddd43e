//! Local username/password authentication gating the manager.
//!
//! Provides:
//! - PBKDF2-HMAC-SHA256 password hashing (240k rounds, per-user salt,
//!   per-record iteration count so the cost can grow over time)
//! - SQLite-backed user records (create / verify / lookup / count)
//! - The login/registration flow, including session auto-resume
//!
//! ## Design Decisions
//! - Verification never tells the caller whether the username or the
//!   password was wrong — one generic failure, no enumeration.
//! - Sessions are opaque random tokens with a local expiry, stored in
//!   the shared settings document (see [`crate::settings`]), not here.
//! - The store opens a connection per operation and is `Clone + Send +
//!   Sync`; any thread may drive it.

pub mod flow;
pub mod hashing;
pub mod store;
pub mod validation;

pub use flow::{AuthFlow, AuthenticatedUser, CancelPolicy, FlowState, Mode};
pub use store::{CredentialStore, StoreError, UserRecord};
pub use validation::ValidationError;
