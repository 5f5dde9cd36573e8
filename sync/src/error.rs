use reqwest::StatusCode;
use thiserror::Error;

/// Faults that callers need to tell apart. Everything else travels as a
/// plain `anyhow::Error` with context attached.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(
        "the schema version of the scrobble store ({found}) is newer than this build supports ({supported})"
    )]
    SchemaTooNew { found: i64, supported: i64 },

    #[error("request to {url} failed with {status}: {body}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        body: String,
    },

    #[error("response is missing the {0} header")]
    MissingRateLimitHeader(&'static str),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("correction script for {day} touched rows outside its day")]
    FixOutOfScope { day: chrono::NaiveDate },
}
