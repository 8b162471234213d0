//! PassForge device web service.
//!
//! Implements the wallet device protocol: registering and unregistering
//! devices for pass updates, listing changed serial numbers, serving the
//! latest signed bundle, and collecting device error logs.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use server::build_router;
pub use state::AppState;
