//! Authoritative routing server: the registration/auth/
//! presence/message-relay/call-signaling counterpart to `peer-engine`.
//! Ephemeral by design — no durable message storage, so the `users`/
//! `calls` tables and everything in `state` live only as long as the
//! process does.

pub mod error;
pub mod router;
pub mod server;
pub mod state;

pub use error::HubError;
pub use server::{run, HubConfig};
pub use state::HubHandle;
