//! Core logic for the isolation plane

mod access;

pub use access::{AccessEnforcer, AccessError, PresentedCredential};
