//! Error taxonomy
//!
//! Every component reports failures with a stable `ErrorCode` (ENNNN).
//! Codes are grouped into nine families; each code carries a category, a
//! default severity, a user-safe message, and an HTTP status. Internals
//! (stack context, payloads) live in `ErrorDetail::context` and are only
//! ever shown to operators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Stable error codes, one enumerated family per thousand-block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    // Generic (E1xxx)
    #[serde(rename = "E1000")]
    Internal,
    #[serde(rename = "E1001")]
    Unknown,
    #[serde(rename = "E1002")]
    Timeout,
    #[serde(rename = "E1003")]
    RateLimited,
    #[serde(rename = "E1004")]
    Unavailable,

    // Validation (E2xxx)
    #[serde(rename = "E2000")]
    Validation,
    #[serde(rename = "E2001")]
    InvalidInput,
    #[serde(rename = "E2002")]
    MissingRequiredField,
    #[serde(rename = "E2003")]
    InvalidFormat,
    #[serde(rename = "E2004")]
    ValueOutOfRange,

    // Authentication / authorization (E3xxx)
    #[serde(rename = "E3000")]
    AuthenticationFailed,
    #[serde(rename = "E3001")]
    InvalidToken,
    #[serde(rename = "E3002")]
    TokenExpired,
    #[serde(rename = "E3003")]
    AuthorizationFailed,
    #[serde(rename = "E3004")]
    InsufficientPermissions,

    // Business logic (E4xxx)
    #[serde(rename = "E4000")]
    BusinessRuleViolation,
    #[serde(rename = "E4001")]
    InvalidOperation,
    #[serde(rename = "E4002")]
    ResourceNotFound,
    #[serde(rename = "E4003")]
    ResourceAlreadyExists,
    #[serde(rename = "E4004")]
    InvalidState,

    // External services (E5xxx)
    #[serde(rename = "E5000")]
    ExternalService,
    #[serde(rename = "E5001")]
    ApiCallFailed,
    #[serde(rename = "E5002")]
    ExternalTimeout,
    #[serde(rename = "E5003")]
    ExternalUnavailable,

    // Storage (E6xxx)
    #[serde(rename = "E6000")]
    Storage,
    #[serde(rename = "E6001")]
    StorageConnection,
    #[serde(rename = "E6002")]
    QueryFailed,
    #[serde(rename = "E6003")]
    TransactionFailed,
    #[serde(rename = "E6004")]
    ConstraintViolation,

    // Configuration (E7xxx)
    #[serde(rename = "E7000")]
    Configuration,
    #[serde(rename = "E7001")]
    MissingConfiguration,
    #[serde(rename = "E7002")]
    InvalidConfiguration,

    // Network (E8xxx)
    #[serde(rename = "E8000")]
    Network,
    #[serde(rename = "E8001")]
    ConnectionTimeout,
    #[serde(rename = "E8002")]
    DnsResolutionFailed,

    // Resource exhaustion (E9xxx)
    #[serde(rename = "E9000")]
    ResourceExhausted,
    #[serde(rename = "E9001")]
    MemoryExhausted,
    #[serde(rename = "E9002")]
    DiskSpaceExhausted,
}

/// Error category, one per code family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Generic,
    Validation,
    Auth,
    Business,
    ExternalService,
    Storage,
    Configuration,
    Network,
    Resource,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Generic => "generic",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Auth => "auth",
            ErrorCategory::Business => "business",
            ErrorCategory::ExternalService => "external_service",
            ErrorCategory::Storage => "storage",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Network => "network",
            ErrorCategory::Resource => "resource",
        }
    }
}

/// Operator-facing severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorCode {
    /// The wire form, e.g. `"E1002"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Internal => "E1000",
            ErrorCode::Unknown => "E1001",
            ErrorCode::Timeout => "E1002",
            ErrorCode::RateLimited => "E1003",
            ErrorCode::Unavailable => "E1004",
            ErrorCode::Validation => "E2000",
            ErrorCode::InvalidInput => "E2001",
            ErrorCode::MissingRequiredField => "E2002",
            ErrorCode::InvalidFormat => "E2003",
            ErrorCode::ValueOutOfRange => "E2004",
            ErrorCode::AuthenticationFailed => "E3000",
            ErrorCode::InvalidToken => "E3001",
            ErrorCode::TokenExpired => "E3002",
            ErrorCode::AuthorizationFailed => "E3003",
            ErrorCode::InsufficientPermissions => "E3004",
            ErrorCode::BusinessRuleViolation => "E4000",
            ErrorCode::InvalidOperation => "E4001",
            ErrorCode::ResourceNotFound => "E4002",
            ErrorCode::ResourceAlreadyExists => "E4003",
            ErrorCode::InvalidState => "E4004",
            ErrorCode::ExternalService => "E5000",
            ErrorCode::ApiCallFailed => "E5001",
            ErrorCode::ExternalTimeout => "E5002",
            ErrorCode::ExternalUnavailable => "E5003",
            ErrorCode::Storage => "E6000",
            ErrorCode::StorageConnection => "E6001",
            ErrorCode::QueryFailed => "E6002",
            ErrorCode::TransactionFailed => "E6003",
            ErrorCode::ConstraintViolation => "E6004",
            ErrorCode::Configuration => "E7000",
            ErrorCode::MissingConfiguration => "E7001",
            ErrorCode::InvalidConfiguration => "E7002",
            ErrorCode::Network => "E8000",
            ErrorCode::ConnectionTimeout => "E8001",
            ErrorCode::DnsResolutionFailed => "E8002",
            ErrorCode::ResourceExhausted => "E9000",
            ErrorCode::MemoryExhausted => "E9001",
            ErrorCode::DiskSpaceExhausted => "E9002",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self.as_str().as_bytes()[1] {
            b'1' => ErrorCategory::Generic,
            b'2' => ErrorCategory::Validation,
            b'3' => ErrorCategory::Auth,
            b'4' => ErrorCategory::Business,
            b'5' => ErrorCategory::ExternalService,
            b'6' => ErrorCategory::Storage,
            b'7' => ErrorCategory::Configuration,
            b'8' => ErrorCategory::Network,
            _ => ErrorCategory::Resource,
        }
    }

    pub fn default_severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Validation | ErrorCategory::Business => ErrorSeverity::Low,
            ErrorCategory::Auth => ErrorSeverity::Medium,
            ErrorCategory::ExternalService | ErrorCategory::Network => ErrorSeverity::Medium,
            ErrorCategory::Storage | ErrorCategory::Resource => ErrorSeverity::High,
            ErrorCategory::Configuration => ErrorSeverity::Critical,
            ErrorCategory::Generic => match self {
                ErrorCode::RateLimited => ErrorSeverity::Low,
                ErrorCode::Timeout => ErrorSeverity::Medium,
                _ => ErrorSeverity::High,
            },
        }
    }

    /// User-safe message, from a fixed map. Raw internals never reach users.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorCode::Validation
            | ErrorCode::InvalidInput
            | ErrorCode::InvalidFormat
            | ErrorCode::ValueOutOfRange => "请检查输入的数据格式是否正确",
            ErrorCode::MissingRequiredField => "缺少必填信息，请补充后重试",
            ErrorCode::AuthenticationFailed | ErrorCode::InvalidToken | ErrorCode::TokenExpired => {
                "用户认证失败，请重新登录"
            },
            ErrorCode::AuthorizationFailed | ErrorCode::InsufficientPermissions => {
                "您没有权限执行此操作"
            },
            ErrorCode::ResourceNotFound => "请求的资源不存在",
            ErrorCode::ResourceAlreadyExists => "资源已存在，请勿重复操作",
            ErrorCode::RateLimited => "请求过于频繁，请稍后再试",
            ErrorCode::Unavailable
            | ErrorCode::ExternalService
            | ErrorCode::ApiCallFailed
            | ErrorCode::ExternalUnavailable => "服务暂时不可用，请稍后再试",
            ErrorCode::Timeout | ErrorCode::ExternalTimeout | ErrorCode::ConnectionTimeout => {
                "请求处理超时，请稍后再试"
            },
            ErrorCode::ResourceExhausted
            | ErrorCode::MemoryExhausted
            | ErrorCode::DiskSpaceExhausted => "系统繁忙，请稍后再试",
            _ => "系统内部错误，请联系技术支持",
        }
    }

    /// HTTP status for the response envelope.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::InvalidInput | ErrorCode::MissingRequiredField => 400,
            ErrorCode::Validation | ErrorCode::InvalidFormat | ErrorCode::ValueOutOfRange => 422,
            ErrorCode::AuthenticationFailed | ErrorCode::InvalidToken | ErrorCode::TokenExpired => {
                401
            },
            ErrorCode::AuthorizationFailed | ErrorCode::InsufficientPermissions => 403,
            ErrorCode::ResourceNotFound => 404,
            ErrorCode::BusinessRuleViolation
            | ErrorCode::ResourceAlreadyExists
            | ErrorCode::InvalidState => 409,
            ErrorCode::RateLimited => 429,
            ErrorCode::ExternalService => 502,
            ErrorCode::ExternalUnavailable => 503,
            ErrorCode::Timeout
            | ErrorCode::Network
            | ErrorCode::ConnectionTimeout
            | ErrorCode::DnsResolutionFailed => 504,
            _ => 500,
        }
    }

    /// Whether the retry policy may re-attempt an idempotent operation that
    /// failed with this code. Only external, transient-storage and network
    /// families qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::ExternalService
                | ErrorCode::ApiCallFailed
                | ErrorCode::ExternalTimeout
                | ErrorCode::ExternalUnavailable
                | ErrorCode::StorageConnection
                | ErrorCode::QueryFailed
                | ErrorCode::Network
                | ErrorCode::ConnectionTimeout
                | ErrorCode::DnsResolutionFailed
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure, constructed at the error site and carried through
/// propagation unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    /// Operator-facing message; never serialized to users.
    pub message: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    /// Structured context for operator logs (sanitized at the boundary).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
    pub trace_id: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorDetail {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            category: code.category(),
            severity: code.default_severity(),
            context: HashMap::new(),
            remediation: None,
            trace_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    /// The user-safe string for the response envelope.
    pub fn user_message(&self) -> &'static str {
        self.code.user_message()
    }
}

/// The crate-wide error type. Wraps an `ErrorDetail` so every failure path
/// carries its classification.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}: {}", .detail.code, .detail.message)]
pub struct Error {
    pub detail: Box<ErrorDetail>,
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            detail: Box::new(ErrorDetail::new(code, message)),
        }
    }

    pub fn from_detail(detail: ErrorDetail) -> Self {
        Self {
            detail: Box::new(detail),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.detail.code
    }

    pub fn with_context(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.detail.context.insert(key.into(), value.into());
        self
    }

    /// Record the error on the metrics spine. Call once, at the site that
    /// decides the error is final for this turn.
    pub fn record(&self) -> &Self {
        metrics::counter!(
            "router_errors_total",
            "code" => self.detail.code.as_str(),
            "category" => self.detail.category.as_str(),
        )
        .increment(1);
        self
    }
}

impl From<ErrorDetail> for Error {
    fn from(detail: ErrorDetail) -> Self {
        Self::from_detail(detail)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_wire_form_and_category() {
        assert_eq!(ErrorCode::Internal.as_str(), "E1000");
        assert_eq!(ErrorCode::ExternalTimeout.as_str(), "E5002");
        assert_eq!(ErrorCode::ExternalTimeout.category(), ErrorCategory::ExternalService);
        assert_eq!(ErrorCode::ConnectionTimeout.category(), ErrorCategory::Network);
        assert_eq!(ErrorCode::ResourceExhausted.category(), ErrorCategory::Resource);
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(ErrorCode::Validation.http_status(), 422);
        assert_eq!(ErrorCode::MissingRequiredField.http_status(), 400);
        assert_eq!(ErrorCode::AuthenticationFailed.http_status(), 401);
        assert_eq!(ErrorCode::AuthorizationFailed.http_status(), 403);
        assert_eq!(ErrorCode::ResourceNotFound.http_status(), 404);
        assert_eq!(ErrorCode::InvalidState.http_status(), 409);
        assert_eq!(ErrorCode::RateLimited.http_status(), 429);
        assert_eq!(ErrorCode::ExternalService.http_status(), 502);
        assert_eq!(ErrorCode::ExternalUnavailable.http_status(), 503);
        assert_eq!(ErrorCode::Timeout.http_status(), 504);
        assert_eq!(ErrorCode::Network.http_status(), 504);
        assert_eq!(ErrorCode::Internal.http_status(), 500);
    }

    #[test]
    fn test_retryable_families() {
        assert!(ErrorCode::ExternalTimeout.is_retryable());
        assert!(ErrorCode::Network.is_retryable());
        assert!(ErrorCode::StorageConnection.is_retryable());
        assert!(!ErrorCode::Validation.is_retryable());
        assert!(!ErrorCode::BusinessRuleViolation.is_retryable());
        assert!(!ErrorCode::Storage.is_retryable());
    }

    #[test]
    fn test_user_message_never_exposes_internals() {
        let err = Error::new(ErrorCode::Storage, "connection pool exhausted at 10.0.0.3");
        assert!(!err.detail.user_message().contains("10.0.0.3"));
    }

    #[test]
    fn test_detail_builder() {
        let detail = ErrorDetail::new(ErrorCode::ExternalTimeout, "nlu deadline exceeded")
            .with_context("service", "nlu")
            .with_remediation("retry after backoff");
        assert_eq!(detail.severity, ErrorSeverity::Medium);
        assert_eq!(detail.context.get("service").unwrap(), "nlu");
        assert!(detail.remediation.is_some());
        assert!(!detail.trace_id.is_empty());
    }

    #[test]
    fn test_code_serde_wire_names() {
        let json = serde_json::to_string(&ErrorCode::RateLimited).unwrap();
        assert_eq!(json, "\"E1003\"");
        let back: ErrorCode = serde_json::from_str("\"E5002\"").unwrap();
        assert_eq!(back, ErrorCode::ExternalTimeout);
    }
}
