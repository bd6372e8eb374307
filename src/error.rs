//! Error types for tidepkg

use thiserror::Error;

/// Main error type for tidepkg operations
#[derive(Error, Debug)]
pub enum TidepkgError {
    #[error("Could not resolve {0} from any mirror")]
    ResolutionFailure(String),

    #[error("Checksum mismatch for {name}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("No checksum entry for {0}")]
    ChecksumMissing(String),

    #[error("Invalid signature for {0}")]
    SignatureInvalid(String),

    #[error("Missing signature for {0}")]
    SignatureMissing(String),

    #[error("Signing key fingerprint mismatch: expected {expected}, got {actual}")]
    KeyFingerprintMismatch { expected: String, actual: String },

    #[error("Repository rollback detected for {repo}: timestamp {found} is older than {last}")]
    RollbackDetected { repo: String, found: i64, last: i64 },

    #[error("Outdated mirror detected for {repo}: metadata is {age}s old")]
    StaleMirror { repo: String, age: i64 },

    #[error("Transaction lock is held by process {0}")]
    LockContention(u32),

    #[error("Failed to release transaction lock: {0}")]
    LockRelease(String),

    #[error("Script {script} failed with status {code}")]
    ScriptFailure { script: String, code: i32 },

    #[error("Installer failed on {package} with status {code}")]
    InstallerExitNonZero { package: String, code: i32 },

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for tidepkg operations
pub type Result<T> = std::result::Result<T, TidepkgError>;
