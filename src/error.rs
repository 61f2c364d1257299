use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use thiserror::Error;

/// Failure kinds for the AI-facing operations. These are always returned as
/// values so callers branch on the variant instead of catching anything.
#[derive(Debug, Error)]
pub enum AiError {
    /// The chat-completion endpoint was unreachable or replied with an
    /// error status. Carries the provider's own error text.
    #[error("upstream API error: {0}")]
    Upstream(String),

    /// The model replied, but the content was not the JSON document the
    /// request demanded.
    #[error("model reply is not valid JSON: {0}")]
    Parse(String),

    /// A required input was absent. Detected before any network call.
    #[error("missing required input: {0}")]
    MissingInput(&'static str),

    /// None of the requested workbooks exist in the catalog. A user-input
    /// problem, not an AI problem.
    #[error("no matching workbooks found in the catalog")]
    NoMatchingWorkbooks,
}

/// HTTP-facing error with the `{code, message, details}` envelope the
/// frontend expects.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("UserID already exists.")]
    UserAlreadyExists(String),
    #[error("UserID not found.")]
    UserNotFound(String),
    #[error("Invalid password.")]
    InvalidPassword,
    #[error("Invalid authentication token.")]
    InvalidToken,
    #[error("Subject not found.")]
    SubjectNotFound {
        name: String,
        publish: String,
        workbook: String,
    },
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingRequiredField(Vec<&'static str>),
    #[error("File not found.")]
    FileNotFound(String),
    #[error("No matching workbooks found.")]
    WorkbookNotFound,
    #[error("AI request failed.")]
    UpstreamAi(String),
    #[error("AI reply could not be parsed.")]
    AiResponseInvalid(String),
    #[error("Database error.")]
    Database(#[from] sqlx::Error),
    #[error("Internal server error.")]
    Internal(String),
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::UserAlreadyExists(_) => "USER_ALREADY_EXISTS",
            ApiError::UserNotFound(_) => "USER_NOT_FOUND",
            ApiError::InvalidPassword => "INVALID_PASSWORD",
            ApiError::InvalidToken => "INVALID_TOKEN",
            ApiError::SubjectNotFound { .. } => "SUBJECT_NOT_FOUND",
            ApiError::MissingRequiredField(_) => "MISSING_REQUIRED_FIELD",
            ApiError::FileNotFound(_) => "FILE_NOT_FOUND",
            ApiError::WorkbookNotFound => "WORKBOOK_NOT_FOUND",
            ApiError::UpstreamAi(_) => "UPSTREAM_AI_ERROR",
            ApiError::AiResponseInvalid(_) => "AI_RESPONSE_INVALID",
            ApiError::Database(_) => "DATABASE_ERROR",
            ApiError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::UserAlreadyExists(_) | ApiError::MissingRequiredField(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::InvalidPassword | ApiError::InvalidToken => StatusCode::UNAUTHORIZED,
            ApiError::UserNotFound(_)
            | ApiError::SubjectNotFound { .. }
            | ApiError::FileNotFound(_)
            | ApiError::WorkbookNotFound => StatusCode::NOT_FOUND,
            ApiError::UpstreamAi(_) | ApiError::AiResponseInvalid(_) => StatusCode::BAD_GATEWAY,
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Value {
        match self {
            ApiError::UserAlreadyExists(user_id) | ApiError::UserNotFound(user_id) => {
                json!({ "user_id": user_id })
            }
            ApiError::SubjectNotFound {
                name,
                publish,
                workbook,
            } => json!({
                "subject_name": name,
                "subject_publish": publish,
                "subject_workbook": workbook,
            }),
            ApiError::MissingRequiredField(fields) => json!({ "fields": fields }),
            ApiError::FileNotFound(path) => json!({ "file_path": path }),
            ApiError::UpstreamAi(detail) | ApiError::AiResponseInvalid(detail) => {
                json!({ "error": detail })
            }
            ApiError::Database(e) => json!({ "error": e.to_string() }),
            ApiError::Internal(detail) => json!({ "error": detail }),
            _ => json!({}),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "{self}");
        } else {
            tracing::warn!(code = self.code(), "{self}");
        }
        let body = json!({
            "code": self.code(),
            "message": self.to_string(),
            "details": self.details(),
        });
        (status, Json(body)).into_response()
    }
}

impl From<AiError> for ApiError {
    fn from(err: AiError) -> Self {
        match err {
            AiError::Upstream(detail) => ApiError::UpstreamAi(detail),
            AiError::Parse(detail) => ApiError::AiResponseInvalid(detail),
            AiError::MissingInput(field) => ApiError::MissingRequiredField(vec![field]),
            AiError::NoMatchingWorkbooks => ApiError::WorkbookNotFound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ai_errors_map_to_envelope_codes() {
        let api: ApiError = AiError::NoMatchingWorkbooks.into();
        assert_eq!(api.code(), "WORKBOOK_NOT_FOUND");
        assert_eq!(api.status(), StatusCode::NOT_FOUND);

        let api: ApiError = AiError::Parse("bad json".into()).into();
        assert_eq!(api.code(), "AI_RESPONSE_INVALID");
        assert_eq!(api.status(), StatusCode::BAD_GATEWAY);

        let api: ApiError = AiError::MissingInput("student data").into();
        assert_eq!(api.code(), "MISSING_REQUIRED_FIELD");
        assert_eq!(api.details()["fields"][0], "student data");
    }
}
