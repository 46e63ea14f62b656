use super::types::PulseError;

#[derive(Debug, Clone)]
pub struct ErrorClassification {
    pub error_type: &'static str,
    pub retryable: bool,
}

impl PulseError {
    /// Classify this error to determine its type and whether it can be retried.
    pub fn classify(&self) -> ErrorClassification {
        match self {
            // Retryable errors
            PulseError::RateLimit { .. } => ErrorClassification {
                error_type: "RateLimitError",
                retryable: true,
            },
            PulseError::Network(_) => ErrorClassification {
                error_type: "NetworkError",
                retryable: true,
            },
            PulseError::Timeout(_) => ErrorClassification {
                error_type: "TimeoutError",
                retryable: true,
            },
            PulseError::Io(_) => ErrorClassification {
                error_type: "IoError",
                retryable: true,
            },

            // Non-retryable errors. A non-2xx status other than 429 is a
            // terminal failure for the attempt cycle.
            PulseError::Http { .. } => ErrorClassification {
                error_type: "HttpStatusError",
                retryable: false,
            },
            PulseError::Config(_) => ErrorClassification {
                error_type: "ConfigError",
                retryable: false,
            },
            PulseError::Validation(_) => ErrorClassification {
                error_type: "ValidationError",
                retryable: false,
            },
            PulseError::Registry(_) => ErrorClassification {
                error_type: "RegistryError",
                retryable: false,
            },
            PulseError::Json(_) => ErrorClassification {
                error_type: "JsonError",
                retryable: false,
            },
            PulseError::Yaml(_) => ErrorClassification {
                error_type: "YamlError",
                retryable: false,
            },
            PulseError::Analysis(_) => ErrorClassification {
                error_type: "AnalysisError",
                retryable: false,
            },

            // Default: retryable
            PulseError::Storage(_) => ErrorClassification {
                error_type: "StorageError",
                retryable: true,
            },
            PulseError::Internal(_) => ErrorClassification {
                error_type: "InternalError",
                retryable: true,
            },
        }
    }
}
