//! # missive-shared
//!
//! Leaf crate shared by every other Missive crate: identifiers, protocol
//! constants, the per-room symmetric encryption layer, and shared error
//! types.  No I/O happens here.

pub mod constants;
pub mod crypto;
pub mod types;

mod error;

pub use error::CryptoError;
