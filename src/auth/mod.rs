//! Session lifecycle for the admin console.
//!
//! Provides:
//! - Login and renewal calls against the platform API (`client`)
//! - Access credential payload decoding into an [`Identity`] (`token`)
//! - Credential persistence scoped to one API origin (`store`)
//! - The [`SessionController`]: restore, login, logout, scheduled renewal
//!
//! ## Design Decisions
//! - The credential is decoded locally but never verified. The API is the
//!   authority; a forged credential only fails later with a 401.
//! - Renewal goes through [`AuthClient`] directly, not the gateway, so a
//!   failed renewal never triggers the unauthorized logout hook.
//! - Every login and logout bumps a session epoch. A renewal response that
//!   lands under an older epoch is dropped.

pub mod client;
pub mod clock;
pub mod session;
pub mod store;
pub mod token;

pub use client::{AuthClient, AuthClientError, TokenGrant, TokenRenewer};
pub use clock::{Clock, ManualClock, SystemClock};
pub use session::{RenewalOutcome, RenewalPolicy, SessionController, SessionError, SessionState};
pub use store::{
    CredentialStore, MemoryCredentialStore, SqliteCredentialStore, StoreError, StoredCredentials,
};
pub use token::{decode_identity, decode_live_identity, Identity, TokenError};
