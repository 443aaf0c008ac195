use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Failed to bind HTTP listener on {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("Watcher subscription error: {0}")]
    WatcherSubscription(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Synchronous contract violations of the job queue.
///
/// Normal job failures are never raised through this type; they are recorded
/// as job state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Invalid target {target:?}: {reason}")]
    InvalidTarget { target: String, reason: String },
}

impl QueueError {
    pub fn invalid_target(target: impl Into<String>, reason: impl Into<String>) -> Self {
        QueueError::InvalidTarget {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_target_display() {
        let err = QueueError::invalid_target("../etc", "path escapes the watch root");
        assert_eq!(
            err.to_string(),
            r#"Invalid target "../etc": path escapes the watch root"#
        );
    }

    #[test]
    fn config_error_display() {
        let err = DaemonError::Config("workers must be at least 1".into());
        assert_eq!(err.to_string(), "Config error: workers must be at least 1");
    }
}
