//! Unified error handling.
//!
//! Component-level errors (`GatewayError`, `DatabaseError`, `ReconcileError`)
//! are converted at the API boundary into an `AppError` carrying the HTTP
//! status, a machine-readable code, and separate user-facing vs diagnostic
//! messages. No transport exception crosses a component boundary raw.

use crate::database::error::DatabaseError;
use crate::gateway::error::GatewayError;
use crate::reconcile::engine::ReconcileError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    #[serde(rename = "AUTHENTICITY_ERROR")]
    AuthenticityError,
    #[serde(rename = "MALFORMED_EVENT")]
    MalformedEvent,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
    #[serde(rename = "ORDER_NOT_FOUND")]
    OrderNotFound,
    #[serde(rename = "GATEWAY_ERROR")]
    GatewayError,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimitError,
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    /// Bad webhook signature. Rejected before any processing.
    Authenticity { message: String },
    /// Unparseable webhook payload.
    MalformedEvent { message: String },
    /// Invalid request input.
    Validation { message: String },
    OrderNotFound,
    /// Remote gateway failure; retryable ones prompt redelivery.
    Gateway { message: String, retryable: bool },
    RateLimited { retry_after: Option<u64> },
    Database { message: String, retryable: bool },
    Internal { message: String },
}

#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub context: Option<String>,
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation {
            message: message.into(),
        })
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Authenticity { .. } => 401,
            AppErrorKind::MalformedEvent { .. } => 400,
            AppErrorKind::Validation { .. } => 400,
            AppErrorKind::OrderNotFound => 404,
            AppErrorKind::Gateway { retryable, .. } => {
                if *retryable {
                    503
                } else {
                    502
                }
            }
            AppErrorKind::RateLimited { .. } => 429,
            AppErrorKind::Database { .. } => 500,
            AppErrorKind::Internal { .. } => 500,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Authenticity { .. } => ErrorCode::AuthenticityError,
            AppErrorKind::MalformedEvent { .. } => ErrorCode::MalformedEvent,
            AppErrorKind::Validation { .. } => ErrorCode::ValidationError,
            AppErrorKind::OrderNotFound => ErrorCode::OrderNotFound,
            AppErrorKind::Gateway { .. } => ErrorCode::GatewayError,
            AppErrorKind::RateLimited { .. } => ErrorCode::RateLimitError,
            AppErrorKind::Database { .. } => ErrorCode::DatabaseError,
            AppErrorKind::Internal { .. } => ErrorCode::InternalError,
        }
    }

    /// User-facing message. Never carries gateway diagnostics.
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Authenticity { .. } => "Invalid webhook signature".to_string(),
            AppErrorKind::MalformedEvent { .. } => "Invalid webhook payload".to_string(),
            AppErrorKind::Validation { message } => message.clone(),
            AppErrorKind::OrderNotFound => "Order not found".to_string(),
            AppErrorKind::Gateway { retryable, .. } => {
                if *retryable {
                    "Payment gateway is temporarily unavailable. Please try again".to_string()
                } else {
                    "Payment processing failed. Please contact support".to_string()
                }
            }
            AppErrorKind::RateLimited { retry_after } => match retry_after {
                Some(secs) => format!("Too many requests. Please retry in {} seconds", secs),
                None => "Too many requests. Please retry later".to_string(),
            },
            AppErrorKind::Database { .. } | AppErrorKind::Internal { .. } => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Gateway { retryable, .. } => *retryable,
            AppErrorKind::Database { retryable, .. } => *retryable,
            AppErrorKind::RateLimited { .. } => true,
            _ => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            AppErrorKind::Authenticity { message }
            | AppErrorKind::MalformedEvent { message }
            | AppErrorKind::Validation { message }
            | AppErrorKind::Internal { message } => write!(f, "{}", message),
            AppErrorKind::OrderNotFound => write!(f, "order not found"),
            AppErrorKind::Gateway { message, .. } => write!(f, "gateway error: {}", message),
            AppErrorKind::RateLimited { .. } => write!(f, "rate limited"),
            AppErrorKind::Database { message, .. } => write!(f, "database error: {}", message),
        }
    }
}

impl std::error::Error for AppError {}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        let kind = match &err {
            GatewayError::AuthenticityError { message } => AppErrorKind::Authenticity {
                message: message.clone(),
            },
            GatewayError::MalformedEventError { message } => AppErrorKind::MalformedEvent {
                message: message.clone(),
            },
            GatewayError::ValidationError { message, .. } => AppErrorKind::Validation {
                message: message.clone(),
            },
            GatewayError::RateLimitError {
                retry_after_seconds,
                ..
            } => AppErrorKind::RateLimited {
                retry_after: *retry_after_seconds,
            },
            _ => AppErrorKind::Gateway {
                message: err.to_string(),
                retryable: err.is_retryable(),
            },
        };
        AppError::new(kind)
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        AppError::new(AppErrorKind::Database {
            message: err.to_string(),
            retryable: err.is_retryable(),
        })
    }
}

impl From<ReconcileError> for AppError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::Store(e) => e.into(),
            ReconcileError::Gateway(e) => e.into(),
            contention @ ReconcileError::Contention { .. } => {
                AppError::new(AppErrorKind::Database {
                    message: contention.to_string(),
                    retryable: true,
                })
            }
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
