//! Login/registration flow: the state machine that gates entry to the
//! application.
//!
//! Lifecycle: construction performs the session check — a parsable,
//! unexpired `SESSION` whose username still resolves to a user record
//! authenticates immediately, with no password prompt. Otherwise the
//! flow opens interactively, in register mode iff the store holds zero
//! users (first run), else login mode. Submissions drive it toward
//! `Authenticated` or leave it interactive with a user-visible message;
//! store failures never crash the flow.
//!
//! The flow owns the transient form fields and returns the
//! authenticated identity as a value — nothing here is global state.

use std::sync::mpsc;
use std::thread;

use thiserror::Error;

use crate::auth::store::{CredentialStore, StoreError};
use crate::auth::validation::{self, ValidationError};
use crate::settings::{SessionRecord, SettingsStore};

/// Which form the flow is presenting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Login,
    Register,
}

/// Current flow state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowState {
    /// Interactive, showing the login or register form.
    Interactive(Mode),
    /// Terminal success: identity handed to the host.
    Authenticated(AuthenticatedUser),
    /// Terminal abort.
    Cancelled,
}

/// The identity handed to the host application on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: i64,
    pub username: String,
}

/// What cancellation means at a given call site. The initial gate exits
/// the process; a re-authentication overlay over a running app keeps it
/// locked instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelPolicy {
    ExitProcess,
    StayLocked,
}

/// A submission was rejected or could not be processed.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Wrong username or password; deliberately indistinguishable.
    #[error("invalid username or password")]
    InvalidCredentials,
    /// Registration with a taken username.
    #[error("username '{0}' is already taken")]
    DuplicateUser(String),
    /// Local input-shape failure; never reached the store.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The store failed; generic to the user, specific in the logs.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Flow-internal inconsistency, e.g. a freshly created account
    /// failing its immediate verification.
    #[error("internal auth error: {0}")]
    Internal(String),
}

impl AuthError {
    /// The message the host should show. Store and internal failures are
    /// flattened to a generic line — implementation detail stays in logs.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::InvalidCredentials => "Invalid username or password.".to_string(),
            AuthError::DuplicateUser(_) => "Username already exists. Choose another.".to_string(),
            AuthError::Validation(e) => e.to_string(),
            AuthError::Store(_) | AuthError::Internal(_) => {
                "Unexpected error. Please try again.".to_string()
            }
        }
    }
}

/// Ephemeral form contents, discarded when the flow ends.
#[derive(Debug, Clone, Default)]
pub struct FormFields {
    pub username: String,
    pub password: String,
    pub confirm: String,
}

/// The login/registration state machine.
#[derive(Debug)]
pub struct AuthFlow {
    store: CredentialStore,
    settings: SettingsStore,
    state: FlowState,
    fields: FormFields,
    /// Persist a session on success ("keep me signed in"). Defaults on.
    pub remember_me: bool,
}

impl AuthFlow {
    /// Build the flow and run the session check.
    ///
    /// A store failure while counting users is not fatal here: the flow
    /// opens in login mode and the failure resurfaces on submit.
    pub fn new(store: CredentialStore, settings: SettingsStore) -> Self {
        if let Some(user) = resume_session(&store, &settings) {
            tracing::info!(username = %user.username, "Session resumed, skipping login");
            return Self {
                store,
                settings,
                state: FlowState::Authenticated(user),
                fields: FormFields::default(),
                remember_me: true,
            };
        }

        let mode = match store.user_count() {
            Ok(0) => Mode::Register,
            Ok(_) => Mode::Login,
            Err(e) => {
                tracing::warn!("Could not count users, defaulting to login mode: {e}");
                Mode::Login
            }
        };
        Self {
            store,
            settings,
            state: FlowState::Interactive(mode),
            fields: FormFields::default(),
            remember_me: true,
        }
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    /// Current mode, if still interactive.
    pub fn mode(&self) -> Option<Mode> {
        match self.state {
            FlowState::Interactive(mode) => Some(mode),
            _ => None,
        }
    }

    pub fn fields(&self) -> &FormFields {
        &self.fields
    }

    pub fn set_username(&mut self, value: &str) {
        self.fields.username = value.to_string();
    }

    pub fn set_password(&mut self, value: &str) {
        self.fields.password = value.to_string();
    }

    pub fn set_confirm(&mut self, value: &str) {
        self.fields.confirm = value.to_string();
    }

    /// Strength score of the current password field, 0–100.
    pub fn password_strength(&self) -> u8 {
        validation::password_strength(&self.fields.password)
    }

    /// Switch between login and register. Clears password and
    /// confirmation — a typed password never silently crosses modes.
    /// The username is kept. No-op once terminal.
    pub fn toggle_mode(&mut self) {
        if let FlowState::Interactive(mode) = self.state {
            self.state = FlowState::Interactive(match mode {
                Mode::Login => Mode::Register,
                Mode::Register => Mode::Login,
            });
            self.fields.password.clear();
            self.fields.confirm.clear();
        }
    }

    /// Submit the current form. On success the flow becomes
    /// `Authenticated` and the identity is returned; on rejection the
    /// flow stays interactive and the error carries the user message.
    /// Every submission is a fresh attempt — no retry state.
    pub fn submit(&mut self) -> Result<AuthenticatedUser, AuthError> {
        let mode = match self.state {
            FlowState::Interactive(mode) => mode,
            // Terminal states do not accept submissions.
            FlowState::Authenticated(ref user) => return Ok(user.clone()),
            FlowState::Cancelled => {
                return Err(AuthError::Internal("flow was cancelled".to_string()));
            }
        };

        let result = match mode {
            Mode::Login => self.submit_login(),
            Mode::Register => self.submit_registration(),
        };

        match result {
            Ok(user) => {
                self.persist_session(&user);
                self.fields = FormFields::default();
                self.state = FlowState::Authenticated(user.clone());
                Ok(user)
            }
            Err(e) => {
                if let AuthError::Store(ref store_err) = e {
                    tracing::warn!("Auth store failure during submit: {store_err}");
                }
                Err(e)
            }
        }
    }

    fn submit_login(&self) -> Result<AuthenticatedUser, AuthError> {
        let username = crate::auth::store::normalize_username(&self.fields.username);
        if username.is_empty() || self.fields.password.is_empty() {
            return Err(ValidationError::EmptyCredentials.into());
        }
        match self.store.verify_user(&username, &self.fields.password)? {
            Some(user_id) => Ok(AuthenticatedUser { user_id, username }),
            None => Err(AuthError::InvalidCredentials),
        }
    }

    fn submit_registration(&self) -> Result<AuthenticatedUser, AuthError> {
        let username = crate::auth::store::normalize_username(&self.fields.username);
        validation::validate_registration(&username, &self.fields.password, &self.fields.confirm)?;

        // Friendly pre-check; the store's uniqueness constraint remains
        // the authoritative guard against a concurrent registration.
        if self.store.get_user(&username)?.is_some() {
            return Err(AuthError::DuplicateUser(username));
        }

        match self.store.create_user(&username, &self.fields.password) {
            Ok(_) => {}
            Err(StoreError::DuplicateUsername(name)) => {
                return Err(AuthError::DuplicateUser(name));
            }
            Err(e) => return Err(e.into()),
        }

        // Immediate verification closes the loop and stamps last_login.
        match self.store.verify_user(&username, &self.fields.password)? {
            Some(user_id) => Ok(AuthenticatedUser { user_id, username }),
            None => Err(AuthError::Internal(format!(
                "post-registration verification failed for '{username}'"
            ))),
        }
    }

    /// Write or clear the remembered session. Persistence failures are
    /// logged and swallowed — the user did authenticate.
    fn persist_session(&self, user: &AuthenticatedUser) {
        let mut doc = self.settings.load();
        if self.remember_me {
            doc.set_session(SessionRecord::issue(&user.username));
        } else {
            doc.clear_session();
        }
        if let Err(e) = self.settings.save(&doc) {
            tracing::warn!("Failed to persist session: {e}");
        }
    }

    /// Explicit abort. The policy names what the host does next; the
    /// flow itself only records the terminal state.
    pub fn cancel(&mut self, policy: CancelPolicy) -> CancelPolicy {
        if !matches!(self.state, FlowState::Authenticated(_)) {
            self.state = FlowState::Cancelled;
            self.fields = FormFields::default();
        }
        policy
    }
}

/// Session fast path: unexpired `SESSION` + still-existing user.
/// Anything malformed falls through silently to interactive login.
fn resume_session(store: &CredentialStore, settings: &SettingsStore) -> Option<AuthenticatedUser> {
    let record = match settings.load().session_record() {
        Ok(Some(record)) => record,
        Ok(None) => return None,
        Err(e) => {
            tracing::debug!("Ignoring corrupt session: {e}");
            return None;
        }
    };
    match record.is_unexpired() {
        Ok(true) => {}
        Ok(false) => {
            tracing::debug!(username = %record.username, "Stored session has expired");
            return None;
        }
        Err(e) => {
            tracing::debug!("Ignoring corrupt session: {e}");
            return None;
        }
    }
    match store.get_user(&record.username) {
        Ok(Some(user)) => Some(AuthenticatedUser {
            user_id: user.id,
            username: user.username,
        }),
        Ok(None) => {
            tracing::debug!(username = %record.username, "Session user no longer exists");
            None
        }
        Err(e) => {
            tracing::warn!("Store unavailable during session check: {e}");
            None
        }
    }
}

/// Run a verification on a worker thread, delivering the outcome over a
/// channel to whichever thread owns the UI. Replaces toolkit-specific
/// callback scheduling with plain message passing.
pub fn verify_in_background(
    store: CredentialStore,
    username: String,
    password: String,
) -> mpsc::Receiver<Result<Option<i64>, StoreError>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // Receiver may have been dropped; nothing to do then.
        let _ = tx.send(store.verify_user(&username, &password));
    });
    rx
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingsDocument;
    use chrono::{Duration, Local};
    use tempfile::TempDir;

    fn fixtures() -> (TempDir, CredentialStore, SettingsStore) {
        let tmp = TempDir::new().unwrap();
        let store = CredentialStore::at_path(tmp.path().join("auth.db")).with_iterations(2_000);
        let settings = SettingsStore::at_path(tmp.path().join("settings.json"));
        (tmp, store, settings)
    }

    fn fill(flow: &mut AuthFlow, username: &str, password: &str, confirm: &str) {
        flow.set_username(username);
        flow.set_password(password);
        flow.set_confirm(confirm);
    }

    #[test]
    fn empty_store_opens_in_register_mode_then_login() {
        let (_tmp, store, settings) = fixtures();

        let mut flow = AuthFlow::new(store.clone(), settings.clone());
        assert_eq!(flow.mode(), Some(Mode::Register));

        fill(&mut flow, "admin", "Secret123!", "Secret123!");
        flow.remember_me = false;
        flow.submit().unwrap();

        // A fresh flow now starts in login mode.
        let flow = AuthFlow::new(store, settings);
        assert_eq!(flow.mode(), Some(Mode::Login));
    }

    #[test]
    fn login_success_and_generic_failure() {
        let (_tmp, store, settings) = fixtures();
        let id = store.create_user("bob", "Secret123!").unwrap();

        let mut flow = AuthFlow::new(store.clone(), settings.clone());
        flow.remember_me = false;
        fill(&mut flow, "bob", "wrong", "");
        let err = flow.submit().unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        assert_eq!(err.user_message(), "Invalid username or password.");
        // Still interactive after a rejection.
        assert_eq!(flow.mode(), Some(Mode::Login));

        fill(&mut flow, "  BOB ", "Secret123!", "");
        let user = flow.submit().unwrap();
        assert_eq!(user.user_id, id);
        assert_eq!(user.username, "bob");
        assert!(matches!(flow.state(), FlowState::Authenticated(_)));
    }

    #[test]
    fn unknown_user_login_is_the_same_generic_failure() {
        let (_tmp, store, settings) = fixtures();
        store.create_user("bob", "Secret123!").unwrap();

        let mut flow = AuthFlow::new(store, settings);
        fill(&mut flow, "nobody", "Secret123!", "");
        let err = flow.submit().unwrap_err();
        assert_eq!(err.user_message(), "Invalid username or password.");
    }

    #[test]
    fn empty_login_fields_never_reach_the_store() {
        let (_tmp, store, settings) = fixtures();
        store.create_user("bob", "Secret123!").unwrap();

        let mut flow = AuthFlow::new(store, settings);
        fill(&mut flow, "bob", "", "");
        assert!(matches!(
            flow.submit().unwrap_err(),
            AuthError::Validation(ValidationError::EmptyCredentials)
        ));
    }

    #[test]
    fn registration_validation_order_username_first() {
        let (_tmp, store, settings) = fixtures();

        let mut flow = AuthFlow::new(store, settings);
        assert_eq!(flow.mode(), Some(Mode::Register));
        // Too-short username AND mismatched passwords: username reported.
        fill(&mut flow, "ab", "longenough", "different");
        assert!(matches!(
            flow.submit().unwrap_err(),
            AuthError::Validation(ValidationError::UsernameTooShort)
        ));
    }

    #[test]
    fn registration_duplicate_is_field_specific() {
        let (_tmp, store, settings) = fixtures();
        store.create_user("alice", "Secret123!").unwrap();

        let mut flow = AuthFlow::new(store, settings);
        flow.toggle_mode(); // store non-empty, so flow opened in login
        fill(&mut flow, "Alice", "Other456!!", "Other456!!");
        let err = flow.submit().unwrap_err();
        assert!(matches!(err, AuthError::DuplicateUser(ref u) if u == "alice"));
        assert_eq!(err.user_message(), "Username already exists. Choose another.");
    }

    #[test]
    fn registration_authenticates_and_stamps_last_login() {
        let (_tmp, store, settings) = fixtures();

        let mut flow = AuthFlow::new(store.clone(), settings);
        flow.remember_me = false;
        fill(&mut flow, "Newbie_1", "Secret123!", "Secret123!");
        let user = flow.submit().unwrap();
        assert_eq!(user.username, "newbie_1");

        let record = store.get_user("newbie_1").unwrap().unwrap();
        assert_eq!(record.id, user.user_id);
        assert!(record.last_login.is_some());
    }

    #[test]
    fn toggle_clears_passwords_keeps_username_and_mode_is_not_recomputed() {
        let (_tmp, store, settings) = fixtures();
        store.create_user("alice", "Secret123!").unwrap();

        let mut flow = AuthFlow::new(store, settings);
        assert_eq!(flow.mode(), Some(Mode::Login));
        fill(&mut flow, "alice", "Secret123!", "Secret123!");

        flow.toggle_mode();
        assert_eq!(flow.mode(), Some(Mode::Register));
        assert_eq!(flow.fields().username, "alice");
        assert!(flow.fields().password.is_empty());
        assert!(flow.fields().confirm.is_empty());

        flow.toggle_mode();
        assert_eq!(flow.mode(), Some(Mode::Login));
    }

    #[test]
    fn remember_me_writes_session_and_next_flow_resumes() {
        let (_tmp, store, settings) = fixtures();
        store.create_user("carol", "Secret123!").unwrap();

        let mut flow = AuthFlow::new(store.clone(), settings.clone());
        fill(&mut flow, "carol", "Secret123!", "");
        flow.submit().unwrap();

        let session = settings.load().session_record().unwrap().unwrap();
        assert_eq!(session.username, "carol");

        // Next launch: no password needed.
        let flow = AuthFlow::new(store, settings);
        match flow.state() {
            FlowState::Authenticated(user) => assert_eq!(user.username, "carol"),
            other => panic!("expected auto-login, got {other:?}"),
        }
    }

    #[test]
    fn opting_out_clears_any_previous_session() {
        let (_tmp, store, settings) = fixtures();
        store.create_user("carol", "Secret123!").unwrap();

        let mut doc = settings.load();
        doc.set_session(SessionRecord::issue("carol"));
        settings.save(&doc).unwrap();

        let mut flow = AuthFlow::new(store.clone(), settings.clone());
        // Auto-resumed; log out and come back without remember-me.
        assert!(matches!(flow.state(), FlowState::Authenticated(_)));
        settings.clear_session().unwrap();

        flow = AuthFlow::new(store, settings.clone());
        flow.remember_me = false;
        fill(&mut flow, "carol", "Secret123!", "");
        flow.submit().unwrap();
        assert!(settings.load().session_record().unwrap().is_none());
    }

    #[test]
    fn expired_session_falls_through_to_login() {
        let (_tmp, store, settings) = fixtures();
        store.create_user("dana", "Secret123!").unwrap();

        let mut record = SessionRecord::issue("dana");
        record.expires_at = (Local::now() - Duration::seconds(1)).to_rfc3339();
        let mut doc = settings.load();
        doc.set_session(record);
        settings.save(&doc).unwrap();

        let flow = AuthFlow::new(store, settings);
        assert_eq!(flow.mode(), Some(Mode::Login));
    }

    #[test]
    fn session_for_deleted_user_does_not_authenticate() {
        let (_tmp, store, settings) = fixtures();
        store.create_user("real", "Secret123!").unwrap();

        let mut doc = settings.load();
        doc.set_session(SessionRecord::issue("ghost"));
        settings.save(&doc).unwrap();

        let flow = AuthFlow::new(store, settings);
        assert_eq!(flow.mode(), Some(Mode::Login));
    }

    #[test]
    fn corrupt_session_object_falls_through_silently() {
        let (_tmp, store, settings) = fixtures();
        store.create_user("eve", "Secret123!").unwrap();
        std::fs::write(
            settings.path(),
            r#"{"SESSION": {"username": "eve", "token": 42}}"#,
        )
        .unwrap();

        let flow = AuthFlow::new(store, settings);
        assert_eq!(flow.mode(), Some(Mode::Login));
    }

    #[test]
    fn cancel_is_terminal_and_policy_is_echoed() {
        let (_tmp, store, settings) = fixtures();

        let mut flow = AuthFlow::new(store, settings);
        let policy = flow.cancel(CancelPolicy::StayLocked);
        assert_eq!(policy, CancelPolicy::StayLocked);
        assert_eq!(*flow.state(), FlowState::Cancelled);
        assert_eq!(flow.mode(), None);
    }

    #[test]
    fn background_verification_delivers_over_channel() {
        let (_tmp, store, settings) = fixtures();
        let id = store.create_user("bg_user", "Secret123!").unwrap();
        drop(settings);

        let rx = verify_in_background(store, "bg_user".into(), "Secret123!".into());
        assert_eq!(rx.recv().unwrap().unwrap(), Some(id));
    }

    #[test]
    fn strength_tracks_password_field() {
        let (_tmp, store, settings) = fixtures();
        let mut flow = AuthFlow::new(store, settings);
        assert_eq!(flow.password_strength(), 0);
        flow.set_password("Abcdef123!xyz");
        assert_eq!(flow.password_strength(), 100);
    }
}
