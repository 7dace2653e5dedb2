use thiserror::Error;

/// Failure classes surfaced by the exchange, oracle and engine layers.
///
/// None of these escape a scheduling cycle; the loop logs them and moves on.
/// `ClockSync` is the only one that aborts startup.
#[derive(Debug, Error)]
pub enum BotError {
    /// Network failure or timeout talking to the venue or the oracle
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Oracle output that does not satisfy the decision contract
    #[error("validation error: {0}")]
    Validation(String),

    /// The venue answered but refused the request
    #[error("venue rejected request (code {code}): {msg}")]
    VenueRejection { code: i64, msg: String },

    /// Signed calls are refused until the local clock is aligned with the venue
    #[error("clock not synchronized with venue: {0}")]
    ClockSync(String),

    /// A response body we could not make sense of
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl BotError {
    pub fn validation(msg: impl Into<String>) -> Self {
        BotError::Validation(msg.into())
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, BotError::Transport(_))
    }
}

impl From<config::ConfigError> for BotError {
    fn from(e: config::ConfigError) -> Self {
        BotError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_venue_rejection_message() {
        let err = BotError::VenueRejection {
            code: -2019,
            msg: "Margin is insufficient.".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "venue rejected request (code -2019): Margin is insufficient."
        );
        assert!(!err.is_transport());
    }

    #[test]
    fn test_decode_error_converts() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{oops");
        let err: BotError = parse.unwrap_err().into();
        assert!(matches!(err, BotError::Decode(_)));
    }
}
