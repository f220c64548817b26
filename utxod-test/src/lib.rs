//! Shared test fixtures and harness utilities, used as a dev-dependency by
//! every other crate in the workspace instead of each crate re-deriving its
//! own genesis bytes or logging setup.

pub mod fixtures;

use std::sync::Once;

static INIT: Once = Once::new();

/// Installs a `tracing` subscriber that prints to stdout, captured by the
/// test harness unless a test fails. Safe to call from every test in every
/// crate — only the first call takes effect.
pub fn init() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });
}

pub use pretty_assertions::{assert_eq, assert_ne};
