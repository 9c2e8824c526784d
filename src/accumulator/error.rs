use thiserror::Error;

/// Everything that can go wrong while updating or proving against an
/// accumulator. A failed batch leaves the accumulator unchanged; the only
/// exception is [Error::Invariant], which signals an internal contradiction
/// and should be treated as fatal by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// The position is not inside the forest spanned by the current number
    /// of leaves.
    #[error("position {0} is outside the forest")]
    OutOfRange(u64),

    /// The same target shows up more than once in one batch.
    #[error("target {0} appears more than once in the batch")]
    DuplicateTarget(u64),

    /// There is no stored hash for this position. For a pollard this also
    /// covers branches that were pruned and need a proof re-ingested before
    /// they can be deleted again.
    #[error("no hash stored for position {0}")]
    Missing(u64),

    /// The proof does not carry the canonical number of hashes for its
    /// targets, or claims positions that cannot exist.
    #[error("proof is malformed for the given targets")]
    ProofMalformed,

    /// A proof hash disagrees with data the pollard already holds.
    #[error("proof hash for position {0} disagrees with cached data")]
    ProofMismatch(u64),

    /// An internal invariant broke. This is a bug, not a caller error.
    #[error("internal invariant broken: {0}")]
    Invariant(&'static str),
}
