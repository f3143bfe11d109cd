use thiserror::Error;

#[derive(Error, Debug)]
pub enum OtoError {
    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Truncated envelope: need {expected} bytes, got {actual}")]
    TruncatedEnvelope { expected: usize, actual: usize },

    #[error("No content key found for nonce {0}")]
    KeyNotFound(String),

    #[error("Container decompression error: {0}")]
    DecompressionError(String),

    #[error("Invalid manifest: {0}")]
    ManifestParseError(String),

    #[error("No audio segment template in manifest")]
    NoAudioSegmentTemplate,

    #[error("Initialization segment download failed: {0}")]
    InitDownloadError(#[source] Box<OtoError>),

    #[error("Segment {number} download failed: {source}")]
    SegmentDownloadError {
        number: u64,
        #[source]
        source: Box<OtoError>,
    },

    #[error("Invalid asset descriptor: {0}")]
    AssetDescriptorError(String),

    #[error("Remux failed: {0}")]
    RemuxError(String),

    #[error("Invalid HTTP header: {0}")]
    InvalidHeader(String),

    #[error("Resolution cancelled")]
    Cancelled,

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    Base64DecodeError(#[from] base64::DecodeError),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    #[error(transparent)]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    MissingExecutable(#[from] which::Error),
}

pub type OtoResult<T> = Result<T, OtoError>;
