use thiserror::Error;

/// Why a script failed to validate. Every variant is a normal, expected
/// outcome of evaluating adversarial input — none of them indicate a bug in
/// the interpreter itself.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum ScriptError {
    #[error("script exceeded the maximum size of {0} bytes")]
    TooLarge(usize),
    #[error("script exceeded the maximum operation count of {0}")]
    TooManyOps(usize),
    #[error("stack exceeded the maximum depth of {0} items")]
    StackOverflow(usize),
    #[error("popped from an empty stack")]
    StackUnderflow,
    #[error("attempted to push {0} bytes, more than the {1}-byte element limit")]
    PushTooLarge(usize, usize),
    #[error("encountered a disabled opcode")]
    DisabledOpcode,
    #[error("unbalanced OP_IF/OP_NOTIF/OP_ELSE/OP_ENDIF")]
    UnbalancedConditional,
    #[error("OP_VERIFY or OP_*VERIFY failed")]
    VerifyFailed,
    #[error("OP_RETURN makes this output provably unspendable")]
    ReturnedEarly,
    #[error("arithmetic input was not a valid minimal-encoded number")]
    InvalidNumber,
    #[error("OP_CHECKMULTISIG's pubkey or signature count was invalid")]
    InvalidMultisigCount,
    #[error("script left more than one value, or a false value, on the stack")]
    NotTrueAtEnd,
    #[error("signature verification failed")]
    SignatureInvalid,
}
