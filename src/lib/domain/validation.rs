use crate::crypto::accumulator::AccumulatorError;

/// Input problems caught before any hashing, encryption or external call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("too many friends: {count} exceeds the maximum of {max}")]
    TooManyFriends { count: usize, max: usize },

    #[error("invalid friend identifier: {0}")]
    InvalidIdentifier(String),

    #[error("friend listed twice: {0}")]
    DuplicateFriend(String),

    #[error("note is {len} bytes, maximum is {max}")]
    NoteTooLong { len: usize, max: usize },

    #[error("threshold {threshold} exceeds the maximum of {max}")]
    ThresholdTooLarge { threshold: u64, max: usize },

    #[error("passphrase is {0} bytes, maximum is 32")]
    PassphraseTooLong(usize),

    #[error("{notes} notes supplied for {friends} friends")]
    NoteCountMismatch { notes: usize, friends: usize },

    #[error("logical index {index} out of range for {slots} slots")]
    LogicalIndexOutOfRange { index: usize, slots: usize },

    #[error("invalid protocol parameters: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Accumulator(#[from] AccumulatorError),
}
