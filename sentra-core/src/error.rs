use thiserror::Error;

/// All errors produced by sentra-core.
///
/// Initialization failures are classified so upstream layers can pick the
/// right user-facing message: resource exhaustion and corrupt artifacts are
/// retryable after user action, an unsupported environment is not.
#[derive(Debug, Error)]
pub enum SentraError {
    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("model artifact is corrupt or empty: {path}")]
    CorruptModel { path: std::path::PathBuf },

    #[error("insufficient free memory: {available_mb} MB available, {required_mb} MB required")]
    InsufficientMemory {
        available_mb: u64,
        required_mb: u64,
    },

    #[error("model cannot fit on this device: {total_mb} MB total, {required_mb} MB required")]
    ModelTooLarge { total_mb: u64, required_mb: u64 },

    #[error("unsupported execution environment: {0}")]
    UnsupportedEnvironment(String),

    #[error("runtime initialization timed out after {0} s")]
    InitTimeout(u64),

    #[error("native engine error: {0}")]
    Native(String),

    #[error("runtime is not ready: {0}")]
    NotReady(String),

    #[error("runtime initialization already failed: {0}")]
    GateFailed(String),

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("call placement failed: {0}")]
    Telephony(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SentraError {
    /// Whether a fresh `initialize()` attempt could plausibly succeed.
    ///
    /// An unsupported environment or a categorically oversized model will
    /// fail identically every time; everything else may clear up after user
    /// action (free memory, replace the artifact, transient native fault).
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            SentraError::UnsupportedEnvironment(_) | SentraError::ModelTooLarge { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SentraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_and_capacity_failures_are_not_retryable() {
        assert!(!SentraError::UnsupportedEnvironment("qemu".into()).is_retryable());
        assert!(!SentraError::ModelTooLarge {
            total_mb: 2048,
            required_mb: 4096
        }
        .is_retryable());
    }

    #[test]
    fn resource_and_timeout_failures_are_retryable() {
        assert!(SentraError::InsufficientMemory {
            available_mb: 512,
            required_mb: 2048
        }
        .is_retryable());
        assert!(SentraError::InitTimeout(120).is_retryable());
        assert!(SentraError::Native("opaque".into()).is_retryable());
    }
}
