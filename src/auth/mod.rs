//! Authentication module.
//!
//! Control socket peers are identified by SO_PEERCRED and checked against
//! `security.allowed_peer_uids`.

mod peer_creds;

pub use peer_creds::{authorize, verify_peer, PeerInfo};
