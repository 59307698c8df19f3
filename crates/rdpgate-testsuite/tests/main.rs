//! All integration tests live in this single test binary so the rdpgate
//! crates are compiled and linked once.

#![allow(unused_crate_dependencies)]

mod connector;
mod fragmentation;
mod rfx;
mod router;
