//! Shared-secret derivation and connection authentication.
//!
//! Both processes derive the same [`SharedSecret`] from configuration and prove possession of
//! it with a mutual HMAC challenge before any request frame is exchanged.

pub mod handshake;
pub mod secret;

pub use handshake::{HandshakeMessage, accept, initiate};
pub use secret::{SECRET_LEN, SharedSecret, derive_secret};
