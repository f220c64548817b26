//! A stack-based, non-Turing-complete script interpreter used to
//! check that a spending input satisfies the conditions a previous output's
//! script encodes.
//!
//! The interpreter never panics on untrusted input: every failure mode a
//! malicious or malformed script can trigger is a [`ScriptError`] variant
//! returned from [`Vm::eval`], not a process abort. Scripts are
//! adversarial input from the network, not a trusted embedded language.

mod error;
mod opcode;
pub mod sighash;
pub mod template;
mod vm;

pub use error::ScriptError;
pub use opcode::Opcode;
pub use vm::{RejectAll, Verifier, Vm};
