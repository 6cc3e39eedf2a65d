//! Wire vocabulary shared by `peer-engine` and `session-hub`: the frame
//! tagged union, the ciphertext envelope, and the small validated types
//! (`UserId`, `Message`, `Call`) that appear in both.

mod call;
mod envelope;
mod error;
mod frame;
mod message;
mod user_id;

pub use call::{Call, CallState};
pub use envelope::{Envelope, MAC_LEN, NONCE_LEN, PUBKEY_LEN, SIG_LEN};
pub use error::WireError;
pub use frame::{Frame, UserSummary};
pub use message::{Message, MessageStatus, MessageType};
pub use user_id::UserId;
