//! The service-level error type, one variant per wire error code (`§7`).

use codec::message::ErrorCode;

use crate::session::RegistryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceError {
    InvalidParam,
    Protocol,
    Crypto,
    NotFound,
    AlreadyExists,
    Full,
    WrongPassword,
    PasswordRequired,
    RateLimited,
    OutOfMemory,
    Internal,
    UnknownPacket,
    ConnectTimeout,
}

impl std::error::Error for ServiceError {}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl ServiceError {
    pub fn code(self) -> ErrorCode {
        match self {
            Self::InvalidParam => ErrorCode::InvalidParam,
            Self::Protocol => ErrorCode::Protocol,
            Self::Crypto => ErrorCode::Crypto,
            Self::NotFound => ErrorCode::NotFound,
            Self::AlreadyExists => ErrorCode::AlreadyExists,
            Self::Full => ErrorCode::Full,
            Self::WrongPassword => ErrorCode::WrongPassword,
            Self::PasswordRequired => ErrorCode::PasswordRequired,
            Self::RateLimited => ErrorCode::RateLimited,
            Self::OutOfMemory => ErrorCode::OutOfMemory,
            Self::Internal => ErrorCode::Internal,
            Self::UnknownPacket => ErrorCode::UnknownPacket,
            Self::ConnectTimeout => ErrorCode::ConnectTimeout,
        }
    }

    /// A short, operator-safe message — never internal detail.
    pub fn message(self) -> &'static str {
        match self {
            Self::InvalidParam => "invalid parameter",
            Self::Protocol => "protocol error",
            Self::Crypto => "signature verification failed",
            Self::NotFound => "session not found",
            Self::AlreadyExists => "session string already in use",
            Self::Full => "session is full",
            Self::WrongPassword => "wrong password",
            Self::PasswordRequired => "password required",
            Self::RateLimited => "rate limited",
            Self::OutOfMemory => "out of memory",
            Self::Internal => "internal error",
            Self::UnknownPacket => "unknown packet type",
            Self::ConnectTimeout => "connect timeout",
        }
    }
}

impl From<RegistryError> for ServiceError {
    fn from(value: RegistryError) -> Self {
        match value {
            RegistryError::AlreadyExists => Self::AlreadyExists,
            RegistryError::InvalidParam => Self::InvalidParam,
            RegistryError::Capacity => Self::OutOfMemory,
            RegistryError::NotFound => Self::NotFound,
            RegistryError::Full => Self::Full,
            RegistryError::WrongPassword => Self::WrongPassword,
            RegistryError::PasswordRequired => Self::PasswordRequired,
            RegistryError::OutOfMemory => Self::OutOfMemory,
        }
    }
}
