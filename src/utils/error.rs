use thiserror::Error;

#[derive(Error, Debug)]
pub enum FinderError {
    #[error("Archive operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error in {field}: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Registry {registry} unavailable: {message}")]
    RegistryError { registry: String, message: String },

    #[error("Whois lookup via {server} failed: {message}")]
    WhoisError { server: String, message: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Data,
    Configuration,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl FinderError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            FinderError::HttpError(_)
            | FinderError::RegistryError { .. }
            | FinderError::WhoisError { .. } => ErrorCategory::Network,
            FinderError::CsvError(_)
            | FinderError::SerializationError(_)
            | FinderError::ZipError(_)
            | FinderError::ProcessingError { .. } => ErrorCategory::Data,
            FinderError::ConfigValidationError { .. }
            | FinderError::InvalidConfigValueError { .. }
            | FinderError::MissingConfigError { .. } => ErrorCategory::Configuration,
            FinderError::IoError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Network => ErrorSeverity::Medium,
            ErrorCategory::Data | ErrorCategory::Configuration => ErrorSeverity::High,
            ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            FinderError::HttpError(_) => "Check network connectivity and retry the run",
            FinderError::RegistryError { .. } => {
                "Retry later or restrict --include to the registries that are reachable"
            }
            FinderError::WhoisError { .. } => {
                "Check that outbound TCP port 43 is allowed and the prefix is valid"
            }
            FinderError::ConfigValidationError { .. }
            | FinderError::InvalidConfigValueError { .. }
            | FinderError::MissingConfigError { .. } => {
                "Fix the command line flags or the configuration file and run again"
            }
            FinderError::IoError(_) => {
                "Check permissions and free space for the cache directory and output file"
            }
            FinderError::CsvError(_)
            | FinderError::SerializationError(_)
            | FinderError::ZipError(_)
            | FinderError::ProcessingError { .. } => {
                "Delete the cache directory to force fresh downloads"
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Network => format!("Network problem: {}", self),
            ErrorCategory::Data => format!("Could not process data: {}", self),
            ErrorCategory::Configuration => format!("Invalid configuration: {}", self),
            ErrorCategory::System => format!("System error: {}", self),
        }
    }

    /// Process exit status for a run that ended with this error.
    pub fn exit_code(&self) -> i32 {
        match self.severity() {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        }
    }
}

pub type Result<T> = std::result::Result<T, FinderError>;
