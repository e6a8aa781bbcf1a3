use std::io;

use thiserror::Error;

/// Error taxonomy of the encrypted-index protocol.
///
/// Protocol and transport failures surface to callers; state errors (an
/// unknown keyword, an uninitialised database on search) deliberately do
/// not — those paths fail closed with an empty result so a caller cannot
/// distinguish "no match" from "never indexed".
#[derive(Debug, Error)]
pub enum VeildexError {
    #[error("malformed protocol message: {0}")]
    Protocol(String),

    #[error("logical database has not been initialised")]
    UninitializedDatabase,

    #[error("tree level in the request does not match the handler")]
    LevelMismatch,

    #[error("label chain is broken: no entry stored for a derived label")]
    ChainBroken,

    #[error("imported group element is corrupt")]
    CorruptGroupElement,

    #[error("ciphertext is shorter than one cipher block")]
    CiphertextTooShort,

    #[error("frame of {0} bytes exceeds the allowed maximum")]
    FrameTooLarge(usize),

    #[error("transport failure: {0}")]
    Transport(#[from] io::Error),

    #[error("serialization failed: {0}")]
    Encode(String),

    #[error("deserialization failed: {0}")]
    Decode(String),

    #[error("server returned an error: {0}")]
    Remote(String),

    #[error("unexpected response kind from server")]
    UnexpectedResponse,
}
