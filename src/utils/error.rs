use thiserror::Error;

#[derive(Error, Debug)]
pub enum MimicError {
    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("BigQuery returned {status}: {message}")]
    BigQueryError { status: u16, message: String },

    #[error("Query job {job_id} did not complete after {attempts} polls")]
    QueryTimeoutError { job_id: String, attempts: u32 },

    #[error("Authentication error: {message}")]
    AuthError { message: String },

    #[error("Missing configuration value: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Configuration validation failed for {field}: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("Invalid params: {message}")]
    InvalidParams { message: String },

    #[error("Method not found: {method}")]
    MethodNotFound { method: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Configuration,
    Data,
    Protocol,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl MimicError {
    pub fn processing(message: impl Into<String>) -> Self {
        Self::ProcessingError {
            message: message.into(),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ApiError(_)
            | Self::BigQueryError { .. }
            | Self::QueryTimeoutError { .. }
            | Self::AuthError { .. } => ErrorCategory::Network,
            Self::MissingConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::ConfigValidationError { .. } => ErrorCategory::Configuration,
            Self::CsvError(_)
            | Self::SerializationError(_)
            | Self::ProcessingError { .. }
            | Self::ValidationError { .. } => ErrorCategory::Data,
            Self::InvalidParams { .. } | Self::MethodNotFound { .. } => ErrorCategory::Protocol,
            Self::IoError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::InvalidParams { .. } | Self::MethodNotFound { .. } => ErrorSeverity::Low,
            Self::ApiError(_) | Self::QueryTimeoutError { .. } => ErrorSeverity::Medium,
            Self::BigQueryError { status, .. } if *status == 429 || *status >= 500 => {
                ErrorSeverity::Medium
            }
            Self::IoError(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::High,
        }
    }

    /// Process exit status for a binary stopping on this error.
    pub fn exit_code(&self) -> i32 {
        match self.severity() {
            ErrorSeverity::Low | ErrorSeverity::High => 1,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::Critical => 3,
        }
    }

    /// Connection failures, throttling and server-side errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ApiError(e) => e.is_connect() || e.is_timeout(),
            Self::BigQueryError { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// JSON-RPC error code for this error.
    pub fn code(&self) -> i64 {
        match self {
            Self::InvalidParams { .. } => -32602,
            Self::MethodNotFound { .. } => -32601,
            Self::SerializationError(_) => -32700,
            _ => -32000,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            Self::AuthError { .. } => "Run `gcloud auth application-default login` or export GOOGLE_OAUTH_ACCESS_TOKEN".to_string(),
            Self::BigQueryError { status: 403, .. } => "Check that the billing project has the BigQuery User role and that your account has been granted access to physionet-data".to_string(),
            Self::BigQueryError { status: 404, .. } => "Check the dataset names and that the BigQuery API is enabled for the billing project".to_string(),
            Self::BigQueryError { .. } | Self::ApiError(_) => "Check network connectivity and retry; the request may succeed on a later attempt".to_string(),
            Self::QueryTimeoutError { .. } => "Increase bigquery.max_poll_attempts or narrow the query".to_string(),
            Self::MissingConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::ConfigValidationError { .. } => "Review the configuration file and command line flags".to_string(),
            Self::CsvError(_) | Self::ValidationError { .. } => "Check that the input CSV is well formed and has an Original_Phrasing column".to_string(),
            Self::IoError(_) => "Check that the file paths exist and are writable".to_string(),
            _ => "See the log output for details".to_string(),
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Network => format!("Could not talk to BigQuery: {}", self),
            ErrorCategory::Configuration => format!("Invalid configuration: {}", self),
            ErrorCategory::Data => format!("Could not process data: {}", self),
            ErrorCategory::Protocol => format!("Bad request: {}", self),
            ErrorCategory::System => format!("System error: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, MimicError>;
