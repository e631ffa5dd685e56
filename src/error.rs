/// Failures surfaced by the upstream clients and session handling.
///
/// `NotFound` is a recoverable "no data" condition and is distinct from
/// `Unavailable`, which covers transport and unexpected upstream failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl From<String> for Error {
    fn from(s: String) -> Error {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Error {
        Error::Internal(s.to_string())
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Error {
        Error::Unavailable(format!("database error {:?}", e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Map an http status from an upstream api to an error
pub fn from_status(status: surf::StatusCode, context: &str) -> Error {
    match status {
        surf::StatusCode::Unauthorized => Error::Unauthenticated,
        surf::StatusCode::NotFound => Error::NotFound(context.to_string()),
        s => Error::Unavailable(format!("{} returned {}", context, s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(matches!(
            from_status(surf::StatusCode::Unauthorized, "me"),
            Error::Unauthenticated
        ));
        assert!(matches!(
            from_status(surf::StatusCode::NotFound, "setlists"),
            Error::NotFound(_)
        ));
        match from_status(surf::StatusCode::TooManyRequests, "setlists") {
            Error::Unavailable(msg) => assert!(msg.contains("429")),
            e => panic!("unexpected {:?}", e),
        }
    }
}
