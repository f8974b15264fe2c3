use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("{resource} not found")]
    ResourceNotFound { resource: String },

    #[error("Unique constraint violated: {message}")]
    UniqueConstraint { message: String },

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("course is full")]
    CourseLimitExceeded,

    #[error("course is not open for register or unregister")]
    CourseRegisterTimeout,

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value for '{field}' ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },
}

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    NotFound,
    Conflict,
    Unauthorized,
    InvalidInput,
    Capacity,
    RegistrationClosed,
    Storage,
    Configuration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl RegistryError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            resource: resource.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ResourceNotFound { .. } => ErrorCategory::NotFound,
            Self::UniqueConstraint { .. } => ErrorCategory::Conflict,
            Self::Unauthorized { .. } => ErrorCategory::Unauthorized,
            Self::InvalidInput { .. } => ErrorCategory::InvalidInput,
            Self::CourseLimitExceeded => ErrorCategory::Capacity,
            Self::CourseRegisterTimeout => ErrorCategory::RegistrationClosed,
            Self::Storage { .. } | Self::IoError(_) | Self::SerializationError(_) => {
                ErrorCategory::Storage
            }
            #[cfg(feature = "postgres")]
            Self::Database(_) => ErrorCategory::Storage,
            Self::ConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. } => ErrorCategory::Configuration,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Capacity | ErrorCategory::RegistrationClosed => ErrorSeverity::Low,
            ErrorCategory::NotFound
            | ErrorCategory::Conflict
            | ErrorCategory::InvalidInput
            | ErrorCategory::Unauthorized => ErrorSeverity::Medium,
            ErrorCategory::Storage => ErrorSeverity::High,
            ErrorCategory::Configuration => ErrorSeverity::Critical,
        }
    }

    /// 傳輸層對應的狀態碼
    pub fn status_code(&self) -> u16 {
        match self.category() {
            ErrorCategory::NotFound => 404,
            ErrorCategory::Conflict => 409,
            ErrorCategory::Unauthorized => 403,
            ErrorCategory::InvalidInput | ErrorCategory::Capacity => 400,
            ErrorCategory::RegistrationClosed => 423,
            ErrorCategory::Storage | ErrorCategory::Configuration => 500,
        }
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// 穩定的錯誤代碼，供情境檔比對預期結果
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ResourceNotFound { .. } => "resource_not_found",
            Self::UniqueConstraint { .. } => "unique_constraint",
            Self::Unauthorized { .. } => "unauthorized",
            Self::InvalidInput { .. } => "invalid_input",
            Self::CourseLimitExceeded => "course_limit_exceeded",
            Self::CourseRegisterTimeout => "course_register_timeout",
            Self::Storage { .. } => "storage",
            #[cfg(feature = "postgres")]
            Self::Database(_) => "storage",
            Self::IoError(_) => "io",
            Self::SerializationError(_) => "serialization",
            Self::ConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. } => "configuration",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Storage => "The registry store failed to complete the request".to_string(),
            _ => self.to_string(),
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::NotFound => "Check that the identifier exists",
            ErrorCategory::Conflict => "The record already exists; no action is needed",
            ErrorCategory::Unauthorized => "Act with an account that holds the required role",
            ErrorCategory::InvalidInput => "Correct the input values and try again",
            ErrorCategory::Capacity => "Pick another course or ask an administrator to raise capacity",
            ErrorCategory::RegistrationClosed => "Wait until the course opens for registration",
            ErrorCategory::Storage => "Check database connectivity and retry",
            ErrorCategory::Configuration => "Fix the configuration file and restart",
        }
    }
}
