use serde::{Deserialize, Serialize};

/// Application error codes following the pattern E{area}{sequence}
///
/// Ranges:
/// - E0xxx: Shared/infrastructure errors
/// - E1xxx: Profile and search-validation errors
/// - E2xxx: Matchmaking errors
/// - E3xxx: Chat session and relay errors
/// - E4xxx: Continue-proposal errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Shared (E0xxx)
    InternalError,
    ValidationError,
    NotFound,
    StorageUnavailable,

    // Profiles (E1xxx)
    ProfileNotFound,
    UserBanned,
    NoInterests,
    InvalidCoordinates,

    // Matchmaking (E2xxx)
    SearchInProgress,
    AlreadyInChat,

    // Chat sessions (E3xxx)
    NotInChat,
    PartnerBusy,
    EmptyMessage,

    // Continue proposals (E4xxx)
    ProposalNotFound,
    ProposalPending,
    ProposalExpired,
    NoSharedHistory,
    SelfProposal,
}

/// Caller-facing classification of a failure. The transport layer maps kinds
/// (and codes, where it wants finer wording) to user-visible messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidState,
    Validation,
    StorageUnavailable,
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            // Shared
            Self::InternalError => "E0001",
            Self::ValidationError => "E0002",
            Self::NotFound => "E0003",
            Self::StorageUnavailable => "E0004",

            // Profiles
            Self::ProfileNotFound => "E1001",
            Self::UserBanned => "E1002",
            Self::NoInterests => "E1003",
            Self::InvalidCoordinates => "E1004",

            // Matchmaking
            Self::SearchInProgress => "E2001",
            Self::AlreadyInChat => "E2002",

            // Chat sessions
            Self::NotInChat => "E3001",
            Self::PartnerBusy => "E3002",
            Self::EmptyMessage => "E3003",

            // Continue proposals
            Self::ProposalNotFound => "E4001",
            Self::ProposalPending => "E4002",
            Self::ProposalExpired => "E4003",
            Self::NoSharedHistory => "E4004",
            Self::SelfProposal => "E4005",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InternalError | Self::StorageUnavailable => ErrorKind::StorageUnavailable,
            Self::ValidationError | Self::NoInterests | Self::InvalidCoordinates
            | Self::EmptyMessage | Self::SelfProposal => ErrorKind::Validation,
            Self::NotFound | Self::ProfileNotFound | Self::ProposalNotFound => ErrorKind::NotFound,
            Self::SearchInProgress | Self::AlreadyInChat | Self::PartnerBusy
            | Self::ProposalPending => ErrorKind::Conflict,
            Self::UserBanned | Self::NotInChat | Self::ProposalExpired
            | Self::NoSharedHistory => ErrorKind::InvalidState,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Known {
        code: ErrorCode,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("internal error")]
    Internal(#[from] anyhow::Error),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("validation error: {0}")]
    Validation(String),
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(code: ErrorCode, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// The stable code string for logging and transport branching.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Known { code, .. } => code.code(),
            Self::Internal(_) => ErrorCode::InternalError.code(),
            Self::Database(diesel::result::Error::NotFound) => ErrorCode::NotFound.code(),
            Self::Database(_) => ErrorCode::StorageUnavailable.code(),
            Self::Cache(_) => ErrorCode::StorageUnavailable.code(),
            Self::Validation(_) => ErrorCode::ValidationError.code(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Known { code, .. } => code.kind(),
            Self::Internal(_) => ErrorKind::StorageUnavailable,
            Self::Database(diesel::result::Error::NotFound) => ErrorKind::NotFound,
            Self::Database(_) => ErrorKind::StorageUnavailable,
            Self::Cache(_) => ErrorKind::StorageUnavailable,
            Self::Validation(_) => ErrorKind::Validation,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
