//! AX4 Archive - Cryptographic Core
//!
//! PBKDF2-SHA256 key derivation and AES-256-GCM for the archive envelope.

pub mod keys;
pub mod kdf;
pub mod aead;

pub use keys::*;
pub use kdf::*;
pub use aead::*;
