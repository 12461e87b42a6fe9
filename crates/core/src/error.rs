//! Error taxonomy for a curiosity walk.
//!
//! A dead end is deliberately absent from this enum: running out of unvisited
//! offramps is a normal way for a walk to finish, not a failure.

/// Every way a walk can fail. None of these are retried inside the core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The model's text was not valid JSON or did not satisfy the expected schema.
    #[error("Malformed model response: {0}")]
    MalformedResponse(String),
    /// A model call, or the whole run, exceeded its time budget.
    #[error("Upstream model timed out: {0}")]
    UpstreamTimeout(String),
    /// The model service could not be reached or answered with an error.
    #[error("Upstream model unavailable: {0}")]
    UpstreamUnavailable(String),
    /// The live narration channel did not acknowledge end-of-stream.
    #[error("Narration delivery incomplete: {0}")]
    DeliveryIncomplete(String),
    /// The caller supplied an input the walk cannot run with.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// A stable, machine-readable classification for run-failure reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::MalformedResponse(_) => "malformed_response",
            Error::UpstreamTimeout(_) => "upstream_timeout",
            Error::UpstreamUnavailable(_) => "upstream_unavailable",
            Error::DeliveryIncomplete(_) => "delivery_incomplete",
            Error::InvalidInput(_) => "invalid_input",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::MalformedResponse("expected value at line 1 column 1".to_string());
        assert_eq!(
            err.to_string(),
            "Malformed model response: expected value at line 1 column 1"
        );

        let err = Error::DeliveryIncomplete("subscriber hung up".to_string());
        assert_eq!(
            err.to_string(),
            "Narration delivery incomplete: subscriber hung up"
        );
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(Error::UpstreamTimeout("x".into()).kind(), "upstream_timeout");
        assert_eq!(
            Error::UpstreamUnavailable("x".into()).kind(),
            "upstream_unavailable"
        );
        assert_eq!(Error::InvalidInput("x".into()).kind(), "invalid_input");
    }
}
