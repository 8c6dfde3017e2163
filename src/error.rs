//! Error types for the wire, script and peer layers
//!
//! Script violations, wire violations and socket failures are kept as
//! separate types so callers can tell a misbehaving program from a
//! misbehaving peer from a dead connection. `PeerError` is the single
//! exit channel of a peer session and wraps the rest.

use thiserror::Error;

/// Violation of a Bitcoin Script rule during parsing or execution.
///
/// Any of these aborts the containing script run; the transaction input
/// being verified is invalid.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// A push or explicit length ran past the end of the program.
    #[error("attempted to read past the end of the script")]
    Truncated,

    /// A program handed to the interpreter exceeds 10,000 bytes.
    #[error("script larger than 10,000 bytes")]
    OversizedProgram,

    /// A pushed element exceeds 520 bytes.
    #[error("stack element larger than 520 bytes")]
    OversizedElement,

    /// Main stack plus alt stack grew beyond 1,000 elements.
    #[error("stack size exceeded 1,000 elements")]
    StackOverflow,

    /// An operation needed more elements than the stack holds.
    #[error("attempted to pop from an empty stack")]
    StackUnderflow,

    /// More than 201 counted operations in one script.
    #[error("more than 201 operations in script")]
    OpCountExceeded,

    #[error("Script attempted to use an integer larger than 4 bytes")]
    IntegerOverflow,

    /// One of the permanently disabled opcodes appeared in the program.
    /// These fail even inside an unexecuted branch.
    #[error("script contains a disabled opcode: {0}")]
    DisabledOpcode(&'static str),

    /// A reserved or unassigned opcode was executed.
    #[error("script used a reserved or unknown opcode: 0x{0:02x}")]
    ReservedOpcode(u8),

    #[error("OP_ELSE without OP_IF/OP_NOTIF")]
    UnmatchedElse,

    #[error("OP_ENDIF without OP_IF/OP_NOTIF")]
    UnmatchedEndif,

    #[error("OP_IF/OP_NOTIF without OP_ENDIF")]
    UnterminatedConditional,

    /// A VERIFY-class opcode saw a false condition.
    #[error("{0} failed")]
    VerifyFailed(&'static str),

    #[error("script called OP_RETURN")]
    OpReturn,

    /// CHECKMULTISIG key or signature count outside its allowed range.
    #[error("OP_CHECKMULTISIG with out-of-range key or signature count")]
    InvalidMultisigCount,

    /// A pay-to-script-hash input script may only contain data pushes.
    #[error("scriptSig spending a pay-to-script-hash output may only contain pushes")]
    NonPushScriptSig,

    #[error("Script resulted in a non-true stack")]
    FalseStack,
}

/// Wire-level protocol violation, or the I/O failure underneath it.
///
/// The `Io` variant keeps TCP failures distinguishable from framing and
/// payload violations while letting both travel through one channel.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("unexpected magic 0x{got:08x}, expected 0x{expected:08x}")]
    BadMagic { expected: u32, got: u32 },

    #[error("message payload of {0} bytes exceeds the 32 MiB limit")]
    OversizedPayload(u32),

    #[error("message checksum mismatch")]
    BadChecksum,

    /// A typed payload failed to parse; the command names the parser.
    #[error("malformed {command} payload: {reason}")]
    Malformed {
        command: String,
        reason: String,
    },

    #[error("unexpected {got} message during handshake, expected {expected}")]
    UnexpectedHandshakeMessage {
        expected: &'static str,
        got: String,
    },

    #[error("Peer does not have a copy of the block chain")]
    ChainlessPeer,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    pub(crate) fn malformed(command: &str, reason: impl Into<String>) -> Self {
        ProtocolError::Malformed {
            command: command.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failure raised by the block chain when a downloaded block does not
/// verify. Produced by `BlockChain` implementations and propagated
/// unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("block verification failed: {0}")]
pub struct VerificationError(pub String);

/// Failure of the underlying block store. Fatal to the peer pool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("block store failure: {0}")]
pub struct BlockStoreError(pub String);

/// Failure of a peer discovery source. The pool logs it and tries the
/// next source on the following tick.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("peer discovery failed: {0}")]
pub struct DiscoveryError(pub String);

/// The single error channel out of a peer session's `run` loop.
#[derive(Error, Debug)]
pub enum PeerError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error(transparent)]
    BlockStore(#[from] BlockStoreError),

    /// The session was shut down while an operation was in flight.
    #[error("peer disconnected")]
    Disconnected,
}

impl From<std::io::Error> for PeerError {
    fn from(err: std::io::Error) -> Self {
        PeerError::Protocol(ProtocolError::Io(err))
    }
}
