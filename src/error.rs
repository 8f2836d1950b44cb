use crate::oid::Oid;

/// error type for gitcell operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid object: {0}")]
    InvalidObject(String),

    #[error("oid mismatch: expected {expected}, computed {actual}")]
    OidMismatch { expected: Oid, actual: Oid },

    #[error("object not found: {0}")]
    ObjectNotFound(Oid),

    #[error("ref not found: {0}")]
    RefNotFound(String),

    #[error("bundle not found: {0}")]
    BundleNotFound(String),

    #[error("no merge in progress")]
    NoMergeInProgress,

    #[error("ambiguous short oid {prefix}: matches {count} objects")]
    AmbiguousOid { prefix: String, count: usize },

    #[error("invalid oid hex: {0}")]
    InvalidOidHex(String),

    #[error("invalid ref name: {0}")]
    InvalidRefName(String),

    #[error("invalid branch name: {0}")]
    InvalidBranchName(String),

    #[error("symbolic ref cycle through {0}")]
    SymbolicRefCycle(String),

    #[error("ref conflict: {0}")]
    RefConflict(String),

    #[error("a merge is already in progress")]
    MergeInProgress,

    #[error("cannot fast-forward: branches have diverged")]
    FastForwardImpossible,

    #[error("{0} unresolved conflicts remain")]
    UnresolvedConflicts(usize),

    #[error("worktree error: {0}")]
    Worktree(String),

    #[error("invalid rev-range: {0}")]
    InvalidRevRange(String),

    #[error("invalid sparse pattern: {0}")]
    InvalidSparsePattern(String),

    #[error("pack format error: {0}")]
    PackFormat(String),

    #[error("pack corrupted: {0}")]
    PackCorrupted(String),

    #[error("bundle format error: {0}")]
    BundleFormat(String),

    #[error("bundle index error: {0}")]
    BundleIndex(String),

    #[error("bundle corrupted: {0}")]
    BundleCorrupted(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("io error in {context}: {message}")]
    Io { context: String, message: String },

    #[error("row encoding error: {0}")]
    RowEncode(String),

    #[error("row decoding error: {0}")]
    RowDecode(String),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("zlib error: {0}")]
    Zlib(String),

    #[error("glob pattern error: {0}")]
    GlobPattern(String),

    #[error("committer identity not configured")]
    MissingIdentity,

    #[error("transport error: {0}")]
    Transport(String),
}

impl Error {
    /// construct an io error with an operation context
    pub fn io(context: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Error::Io {
            context: context.into(),
            message: message.to_string(),
        }
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for Error {
    fn from(e: ciborium::ser::Error<std::io::Error>) -> Self {
        Error::RowEncode(e.to_string())
    }
}

impl From<ciborium::de::Error<std::io::Error>> for Error {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        Error::RowDecode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
