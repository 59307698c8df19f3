//! Shared fixtures for the rdpgate integration tests: a server-side
//! licensing oracle and canned negotiation messages.

// No need to be as strict as in production code.
#![allow(clippy::unwrap_used)]
#![allow(clippy::arithmetic_side_effects)]
#![allow(clippy::cast_possible_truncation)]

pub mod licensing;
pub mod negotiation;
