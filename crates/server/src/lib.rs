//! HTTP surface for docproc.
//!
//! Routes live under `/api/v2`. Every route except `/health` resolves the
//! caller through an [`auth::AuthProvider`] and scopes task access to that
//! caller's identity.

pub mod api;
pub mod auth;
pub mod error;
pub mod router;
pub mod startup;
pub mod state;

pub use router::build_router;
pub use state::AppState;
