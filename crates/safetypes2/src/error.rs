//! Error taxonomy (§7) and the small enums the public surface (§6.1) needs.

/// Access return codes used pervasively across container operations.
/// Mirrors the original C's `s2_access_retvals` enum one-for-one.
#[repr(i8)]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum AccessResult {
    Error = -1,
    Empty = 0,
    Success = 1,
}

/// Setter semantics: what happens to the caller's lexical reference when an
/// object is handed into a container slot.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SetterSemantics {
    /// Container keeps its own reference; the caller keeps theirs too and
    /// must `release` independently later.
    Kept,
    /// Caller is transferring ownership: the container keeps a reference and
    /// the caller's lexical reference is released on their behalf.
    Gave,
}

/// Sequence cursor seek anchors.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SeekWhence {
    Set,
    End,
    Cur,
}

/// Typed detail carried inside `AccessResult::Error` cases where a bare
/// sentinel would lose information a caller plausibly wants to branch on.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum SafeTypesError {
    #[error("allocation failed")]
    AllocationFailed,
    #[error("buffer is mapped ({0} outstanding exposure(s))")]
    BufferMapped(u32),
    #[error("trie depth exhausted at level {0}")]
    TrieDepthExhausted(u8),
    #[error("cursor position {0} out of range [0, {1}]")]
    OutOfRange(isize, usize),
}
