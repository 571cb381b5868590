//! Claims service error types.
//!
//! Two disjoint representations:
//!
//! - [`ClientError`] is always safe to serialize to the caller. 4xx errors are
//!   built directly; 5xx errors are only ever produced from an [`ApiError`].
//! - [`ApiError`] is an internal fault. It carries a random instance id, the
//!   UTC time it was raised, free-form details and captured stack frames. It
//!   is never serialized to the caller; [`ApiError::to_client_error`] gives the
//!   caller a 500 with enough correlation data (`id`, `area`, `utcTime`) for an
//!   operator to find the matching log record written from
//!   [`ApiError::to_log_format`].
//!
//! [`ResolutionError`] tags which of the two a pipeline failure is.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};
use std::backtrace::Backtrace;
use std::fmt;
use thiserror::Error;

/// Lower bound for random error instance ids.
pub const MIN_ERROR_ID: u32 = 10_000;

/// Upper bound for random error instance ids.
pub const MAX_ERROR_ID: u32 = 99_999;

/// Error code for a request without a usable bearer token.
pub const MISSING_TOKEN_CODE: &str = "missing_token";

/// Error code for a token the authority rejected.
pub const UNAUTHORIZED_CODE: &str = "unauthorized";

/// Message returned for every 401.
pub const UNAUTHORIZED_MESSAGE: &str = "Missing, invalid or expired access token";

/// Error codes for internal faults raised by the pipeline.
pub mod codes {
    /// Token Authority unreachable or returned an error status.
    pub const INTROSPECTION_FAILURE: &str = "introspection_failure";

    /// Token Authority userinfo endpoint unreachable or returned an error status.
    pub const USERINFO_FAILURE: &str = "userinfo_failure";

    /// Entitlement Service unreachable or returned an error status.
    pub const ENTITLEMENT_FAILURE: &str = "entitlement_lookup_failure";

    /// Upstream answered with a body that could not be interpreted.
    pub const UPSTREAM_DATA_ERROR: &str = "upstream_data_error";

    /// Anything else.
    pub const SERVER_ERROR: &str = "server_error";
}

/// Client-safe response body.
///
/// `id`, `area` and `utc_time` are only present for 5xx errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utc_time: Option<String>,
}

/// Capabilities of an error that may be returned to a caller.
///
/// [`ClientError`] is the standard implementation. Other client-safe error
/// types can implement this to be rendered and logged the same way.
pub trait ClientFault: fmt::Debug + Send + Sync {
    /// HTTP status code.
    fn status_code(&self) -> StatusCode;

    /// Stable error code.
    fn error_code(&self) -> &str;

    /// Body returned to the caller.
    fn to_response_format(&self) -> ErrorBody;

    /// Record written to the operational log.
    fn to_log_format(&self) -> Value;
}

/// Correlation fields attached to a 500 response.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ExceptionDetails {
    area: String,
    id: u32,
    utc_time: String,
}

/// An error that is safe to return to the caller.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct ClientError {
    status: StatusCode,
    code: String,
    message: String,
    log_context: Option<Value>,
    exception: Option<ExceptionDetails>,
}

impl ClientError {
    /// Create a client error from its mandatory fields.
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            log_context: None,
            exception: None,
        }
    }

    /// Standard 401 for a token that is missing, invalid or expired.
    ///
    /// `reason` is only written to the log.
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, UNAUTHORIZED_CODE, UNAUTHORIZED_MESSAGE)
            .with_log_context(Value::String(reason.into()))
    }

    /// 401 for a request that carried no usable `Bearer` credential.
    pub fn missing_token() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, MISSING_TOKEN_CODE, UNAUTHORIZED_MESSAGE)
            .with_log_context(Value::String("No access token received".to_string()))
    }

    /// Attach data that is logged but never returned.
    #[must_use]
    pub fn with_log_context(mut self, context: Value) -> Self {
        self.log_context = Some(context);
        self
    }

    /// Attach 500 correlation data.
    fn with_exception_details(mut self, area: &str, id: u32, utc_time: &str) -> Self {
        self.exception = Some(ExceptionDetails {
            area: area.to_string(),
            id,
            utc_time: utc_time.to_string(),
        });
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn log_context(&self) -> Option<&Value> {
        self.log_context.as_ref()
    }

    /// Instance id for 500 errors, `None` for client-classified errors.
    pub fn instance_id(&self) -> Option<u32> {
        self.exception.as_ref().map(|e| e.id)
    }
}

impl ClientFault for ClientError {
    fn status_code(&self) -> StatusCode {
        self.status
    }

    fn error_code(&self) -> &str {
        &self.code
    }

    fn to_response_format(&self) -> ErrorBody {
        let exception = self
            .exception
            .as_ref()
            .filter(|e| e.id > 0 && !e.area.is_empty() && !e.utc_time.is_empty());

        ErrorBody {
            code: self.code.clone(),
            message: self.message.clone(),
            id: exception.map(|e| e.id),
            area: exception.map(|e| e.area.clone()),
            utc_time: exception.map(|e| e.utc_time.clone()),
        }
    }

    fn to_log_format(&self) -> Value {
        let mut data = json!({
            "statusCode": self.status.as_u16(),
            "clientError": self.to_response_format(),
        });

        if let (Some(context), Some(map)) = (&self.log_context, data.as_object_mut()) {
            map.insert("context".to_string(), context.clone());
        }

        data
    }
}

impl IntoResponse for ClientError {
    fn into_response(self) -> Response {
        let status = self.status;
        let mut response = (status, Json(self.to_response_format())).into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Bearer error=\"invalid_token\""),
            );
        }

        response
    }
}

/// An internal fault.
///
/// Never returned to a caller directly.
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    code: String,
    message: String,
    instance_id: u32,
    utc_time: DateTime<Utc>,
    details: Option<String>,
    stack_frames: Vec<String>,
}

impl ApiError {
    /// Create an internal fault, assigning an instance id and timestamp and
    /// capturing the current stack.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        let mut error = Self {
            code: code.into(),
            message: message.into(),
            instance_id: rand::thread_rng().gen_range(MIN_ERROR_ID..=MAX_ERROR_ID),
            utc_time: Utc::now(),
            details: None,
            stack_frames: Vec::new(),
        };

        error.add_to_stack_frames(&Backtrace::force_capture().to_string());
        error
    }

    /// Attach free-form internal detail.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Record a downstream error and its source chain in the stack frames.
    #[must_use]
    pub fn with_source(mut self, source: &(dyn std::error::Error + 'static)) -> Self {
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(source);
        while let Some(err) = current {
            self.stack_frames.push(format!("caused by: {err}"));
            current = err.source();
        }
        self
    }

    /// Append newline-separated frames, trimmed, skipping blank lines.
    pub fn add_to_stack_frames(&mut self, stack: &str) {
        self.stack_frames.extend(
            stack
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        );
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn instance_id(&self) -> u32 {
        self.instance_id
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    pub fn stack_frames(&self) -> &[String] {
        &self.stack_frames
    }

    fn utc_time_string(&self) -> String {
        self.utc_time.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// The 500 response for the caller, tagged with this fault's correlation data.
    pub fn to_client_error(&self, service_name: &str) -> ClientError {
        ClientError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            self.code.clone(),
            self.message.clone(),
        )
        .with_exception_details(service_name, self.instance_id, &self.utc_time_string())
    }

    /// Full record for the operational log.
    pub fn to_log_format(&self, service_name: &str) -> Value {
        json!({
            "statusCode": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            "clientError": self.to_client_error(service_name).to_response_format(),
            "serviceError": {
                "details": self.details.clone().unwrap_or_default(),
                "stack": self.stack_frames,
            },
        })
    }
}

/// A classified pipeline failure.
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// Denial that is returned to the caller as is.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Fault that is logged in full and returned as a 500.
    #[error(transparent)]
    Internal(#[from] ApiError),
}

impl ResolutionError {
    /// Map any failure to the error returned to the caller.
    pub fn to_client_error(&self, service_name: &str) -> ClientError {
        match self {
            ResolutionError::Client(error) => error.clone(),
            ResolutionError::Internal(error) => error.to_client_error(service_name),
        }
    }

    /// Structured log record for this failure.
    pub fn to_log_format(&self, service_name: &str) -> Value {
        match self {
            ResolutionError::Client(error) => error.to_log_format(),
            ResolutionError::Internal(error) => error.to_log_format(service_name),
        }
    }
}
