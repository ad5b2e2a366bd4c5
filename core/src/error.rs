//! Error types of the envelope codec.

use bitcoin::consensus::encode;

/// Result alias used across the crate.
pub type Result<T, E = EnvelopeError> = std::result::Result<T, E>;

/// Everything that can go wrong while encoding, decoding or hashing an envelope.
///
/// All variants are local and synchronous; none of them is transient, so callers
/// should not retry on them.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// A count or length prefix could not be parsed, or implied a read past the
    /// end of the stream.
    #[error("malformed length prefix: {0}")]
    MalformedLength(#[from] encode::Error),

    /// Dual-tree witness section disagrees with the prefix input count.
    #[error("non equal witness and prefix input quantities (prefix {prefix}, witness {witness})")]
    WitnessCountMismatch { prefix: usize, witness: usize },

    /// A witness section was flagged but every stack in it is empty.
    #[error("superfluous witness record")]
    SuperfluousWitness,

    /// The optional-data flag byte carried bits this format does not know.
    #[error("unknown transaction optional data (flags {0:#04x})")]
    UnknownOptionalData(u8),

    /// The special-transaction payload does not match its declared length.
    #[error("raw payload is bigger than expected (declared {declared}, available {available})")]
    PayloadOverrun { declared: usize, available: usize },

    /// The network's proof-of-work hash algorithm has no implementation.
    #[error("hash algorithm {0} is not supported")]
    UnsupportedHash(&'static str),

    /// A complete record was decoded but input bytes remain.
    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),

    /// The in-memory envelope violates an invariant of the selected format.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(&'static str),

    /// The format descriptor combines options that cannot be encoded.
    #[error("invalid format descriptor: {0}")]
    InvalidDescriptor(&'static str),

    /// No network with this name is registered.
    #[error("unknown network: {0}")]
    UnknownNetwork(String),

    /// Registry configuration could not be parsed.
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),

    /// Writing to the output stream failed.
    #[error("io error: {0}")]
    Io(#[from] bitcoin::io::Error),
}

impl EnvelopeError {
    /// True when the error came from truncated or malformed input rather than
    /// from a caller-side mistake.
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            EnvelopeError::MalformedLength(_)
                | EnvelopeError::WitnessCountMismatch { .. }
                | EnvelopeError::SuperfluousWitness
                | EnvelopeError::UnknownOptionalData(_)
                | EnvelopeError::PayloadOverrun { .. }
                | EnvelopeError::TrailingBytes(_)
        )
    }
}
