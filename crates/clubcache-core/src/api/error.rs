use serde::Deserialize;
use thiserror::Error;

/// Failure talking to the table service.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized - API key missing or rejected")]
    Unauthorized,

    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("Table or row not found: {0}")]
    NotFound(String),

    #[error("Bad query: {0}")]
    BadRequest(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unexpected status {status}: {message}")]
    UnexpectedStatus { status: u16, message: String },

    #[error("Not configured: {0}")]
    NotConfigured(&'static str),
}

/// Body of a PostgREST error response.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    hint: Option<String>,
}

/// Longest raw body kept in an error message
const MAX_ERROR_BODY_LENGTH: usize = 300;

impl ApiError {
    /// Readable message from a response body: the structured `message`
    /// (with code and hint) when present, otherwise the raw text cut short.
    fn describe(body: &str) -> String {
        if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
            let mut message = match parsed.code {
                Some(code) => format!("{} [{}]", parsed.message, code),
                None => parsed.message,
            };
            if let Some(hint) = parsed.hint {
                message.push_str(&format!(" (hint: {})", hint));
            }
            return message;
        }

        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... ({} bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = Self::describe(body);
        match status.as_u16() {
            400 => ApiError::BadRequest(message),
            401 => ApiError::Unauthorized,
            403 => ApiError::Forbidden(message),
            404 => ApiError::NotFound(message),
            429 => ApiError::RateLimited,
            code @ 500..=599 => ApiError::Server { status: code, message },
            code => ApiError::UnexpectedStatus { status: code, message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(ApiError::from_status(StatusCode::UNAUTHORIZED, ""), ApiError::Unauthorized));
        assert!(matches!(ApiError::from_status(StatusCode::TOO_MANY_REQUESTS, ""), ApiError::RateLimited));
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_GATEWAY, "upstream down"),
            ApiError::Server { status: 502, ref message } if message == "upstream down"
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::IM_A_TEAPOT, ""),
            ApiError::UnexpectedStatus { status: 418, .. }
        ));
    }

    #[test]
    fn test_structured_body_is_unwrapped() {
        let body = r#"{"code":"42P01","details":null,"hint":null,"message":"relation \"public.teamz\" does not exist"}"#;
        match ApiError::from_status(StatusCode::NOT_FOUND, body) {
            ApiError::NotFound(msg) => assert_eq!(msg, "relation \"public.teamz\" does not exist [42P01]"),
            other => panic!("unexpected {other:?}"),
        }

        let body = r#"{"code":"42703","message":"column teams.clubid does not exist","hint":"Perhaps you meant club_id"}"#;
        match ApiError::from_status(StatusCode::BAD_REQUEST, body) {
            ApiError::BadRequest(msg) => assert!(msg.ends_with("(hint: Perhaps you meant club_id)")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_long_raw_bodies_are_cut() {
        let body = "é".repeat(400);
        match ApiError::from_status(StatusCode::INTERNAL_SERVER_ERROR, &body) {
            ApiError::Server { message, .. } => {
                assert!(message.ends_with("... (800 bytes)"));
                assert!(message.len() < body.len());
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
