//! Access gate and settings layer for a desktop S3/MinIO manager.
//!
//! The GUI shell and the S3 transfer engine live elsewhere; this crate
//! owns what they both depend on:
//!
//! - [`auth`] — local credential store, password hashing, and the
//!   login/registration flow that gates application entry
//! - [`settings`] — the shared JSON settings document: S3 connection
//!   configuration plus the "keep me signed in" session
//!
//! A host may only proceed past authentication with the
//! [`auth::AuthenticatedUser`] value a flow hands back.

pub mod auth;
pub mod settings;
