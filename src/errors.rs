/// Domain-specific error types for the dashboard backend.
/// Nothing here is fatal once the server is up:
/// - Fetch failures are logged and surfaced to the dashboard
/// - Calculation errors are returned inline to the caller
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("market API error: {status} {body}")]
    MarketApi { status: u16, body: String },

    #[error("no price data for selected contract")]
    NoPriceData,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("contract not found: {0}")]
    MissingContract(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("not a number: {0}")]
    NotANumber(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

impl AppError {
    /// Stable snake_case tag sent to the dashboard alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Parse(_) => "parse",
            Self::MarketApi { .. } => "market_api",
            Self::NoPriceData => "no_price_data",
            Self::InvalidInput(_) => "invalid_input",
            Self::MissingContract(_) => "missing_contract",
            Self::InsufficientData(_) => "insufficient_data",
            Self::NotANumber(_) => "not_a_number",
            Self::Database(_) => "database",
            Self::Config(_) => "config",
            Self::ChannelClosed(_) => "channel_closed",
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "error": self.to_string(), "kind": self.kind() })
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Parse(e.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
