use thiserror::Error;

/// Errors raised by the exchange library.
///
/// The variants are grouped into two classes that the tool layer reports
/// differently: network-level failures and exchange-reported failures.
/// `Other` falls outside both.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("{0}")]
    Network(String),
    #[error("rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("exchange not available: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Exchange(String),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("bad symbol: {0}")]
    BadSymbol(String),
    #[error("invalid order: {0}")]
    InvalidOrder(String),
    #[error("not supported: {0}")]
    NotSupported(String),
    #[error("bad response: {0}")]
    BadResponse(String),

    #[error("{0}")]
    Other(String),
}

impl ExchangeError {
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited(_) | Self::Unavailable(_)
        )
    }

    pub fn is_exchange(&self) -> bool {
        matches!(
            self,
            Self::Exchange(_)
                | Self::Authentication(_)
                | Self::BadSymbol(_)
                | Self::InvalidOrder(_)
                | Self::NotSupported(_)
                | Self::BadResponse(_)
        )
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::BadResponse(e.to_string())
        } else if e.is_builder() {
            Self::Other(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl From<url::ParseError> for ExchangeError {
    fn from(e: url::ParseError) -> Self {
        Self::Other(format!("invalid url: {}", e))
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(e: serde_json::Error) -> Self {
        Self::BadResponse(e.to_string())
    }
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;
