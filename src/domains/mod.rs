//! Domains module containing business logic organized by bounded contexts.
//!
//! The server exposes a single domain: tools for MOF research.

pub mod tools;
