use thiserror::Error;

/// Pipeline stage a failure originated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Configuring,
    Serializing,
    Encoding,
    Sealing,
    Unsealing,
    Decoding,
    Deserializing,
    Routing,
}

/// Invalid or unusable configuration. Fatal at construction time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid threshold: need 1 <= k <= n, got k={min_partitions}, n={max_partitions}")]
    InvalidThreshold {
        max_partitions: usize,
        min_partitions: usize,
    },

    #[error("at most {max} partitions are addressable, got {requested}")]
    TooManyPartitions { requested: usize, max: usize },

    #[error("keyspace size must be positive")]
    InvalidKeyspace,

    #[error("hash algorithm `{0}` is not available")]
    HashUnavailable(String),

    #[error("invalid {name}: {reason}")]
    InvalidKeyMaterial { name: &'static str, reason: String },

    #[error("unable to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("unable to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Threshold codec failure. Recoverable by supplying more or different partitions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("insufficient fragments: have {have}, need {need}")]
    InsufficientFragments { have: usize, need: usize },

    #[error("partition index {index} outside 1..={max}")]
    CorruptFragment { index: u8, max: usize },

    #[error("partitions from {generations} different encodings each meet the threshold")]
    MixedGenerations { generations: usize },

    #[error("reconstructed stream does not match its generation tag")]
    IntegrityMismatch,

    #[error("malformed partition {index}: {reason}")]
    MalformedPartition { index: u8, reason: &'static str },
}

/// Per-partition sealing failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("unable to seal partition {index}")]
    SealFailure { index: u8 },

    #[error("unable to unseal partition {index}: {reason}")]
    UnsealFailure { index: u8, reason: &'static str },
}

impl CryptoError {
    pub fn index(&self) -> u8 {
        match self {
            CryptoError::SealFailure { index } | CryptoError::UnsealFailure { index, .. } => *index,
        }
    }
}

/// Resource encoding failure. Fatal for the operation it occurred in.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("unable to serialize resource: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("reconstructed bytes are not a valid resource: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("stream of {len} bytes is shorter than the {padding} byte padding")]
    TruncatedStream { len: usize, padding: usize },
}

/// Failures of the node directory collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error("no candidate node available")]
    NoNodesAvailable,

    #[error("node {node} is unreachable")]
    Unreachable { node: String },

    #[error("no placements recorded for resource `{0}`")]
    UnknownResource(String),
}

/// Canonical error type returned by the tracker pipeline.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    Node(#[from] NodeError),

    /// Some partitions failed to unseal and the survivors could not be decoded.
    #[error("reassembly failed after rejecting {} partition(s): {cause}", rejected.len())]
    Reassembly {
        rejected: Vec<CryptoError>,
        #[source]
        cause: CodecError,
    },
}

impl TrackerError {
    pub fn stage(&self) -> Stage {
        match self {
            TrackerError::Config(_) => Stage::Configuring,
            TrackerError::Codec(_) | TrackerError::Reassembly { .. } => Stage::Decoding,
            TrackerError::Crypto(CryptoError::SealFailure { .. }) => Stage::Sealing,
            TrackerError::Crypto(CryptoError::UnsealFailure { .. }) => Stage::Unsealing,
            TrackerError::Serialization(SerializationError::Encode(_)) => Stage::Serializing,
            TrackerError::Serialization(_) => Stage::Deserializing,
            TrackerError::Node(_) => Stage::Routing,
        }
    }

    /// Whether fetching more or different partitions could succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TrackerError::Codec(_)
                | TrackerError::Crypto(CryptoError::UnsealFailure { .. })
                | TrackerError::Reassembly { .. }
                | TrackerError::Node(NodeError::Unreachable { .. })
        )
    }
}
