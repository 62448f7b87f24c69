use crate::errors::{AppError, AppResult};
use std::path::PathBuf;

pub const LOCAL_API_BASE: &str = "http://localhost:5001/api";
pub const PRODUCTION_API_BASE: &str = "https://optiontracker.onrender.com/api";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub market_api_base_url: String,
    pub app_origin: String,
    pub server_port: u16,
    pub data_dir: PathBuf,
    pub static_dir: PathBuf,
    pub default_ticker: String,
    pub default_investment: f64,
    pub recalc_interval_ms: u64,
    pub http_timeout_secs: u64,
    /// 0 disables the periodic health ping
    pub keepalive_interval_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> AppResult<Self> {
        dotenvy::dotenv().ok();

        let server_port = env_var_or("SERVER_PORT", "3001")
            .parse::<u16>()
            .map_err(|e| AppError::Config(format!("SERVER_PORT: {e}")))?;

        let default_investment = env_var_or("DEFAULT_INVESTMENT", "10000")
            .parse::<f64>()
            .map_err(|e| AppError::Config(format!("DEFAULT_INVESTMENT: {e}")))?;
        if !default_investment.is_finite() || default_investment <= 0.0 {
            return Err(AppError::Config(format!(
                "DEFAULT_INVESTMENT must be positive, got {default_investment}"
            )));
        }

        let recalc_interval_ms = env_var_or("RECALC_INTERVAL_MS", "300")
            .parse::<u64>()
            .map_err(|e| AppError::Config(format!("RECALC_INTERVAL_MS: {e}")))?;

        let http_timeout_secs = env_var_or("HTTP_TIMEOUT_SECS", "15")
            .parse::<u64>()
            .map_err(|e| AppError::Config(format!("HTTP_TIMEOUT_SECS: {e}")))?;

        let keepalive_interval_secs = env_var_or("KEEPALIVE_INTERVAL_SECS", "0")
            .parse::<u64>()
            .map_err(|e| AppError::Config(format!("KEEPALIVE_INTERVAL_SECS: {e}")))?;

        let app_origin = env_var_or("APP_ORIGIN", "http://localhost");
        let market_api_base_url = match std::env::var("MARKET_API_BASE_URL") {
            Ok(url) if !url.trim().is_empty() => url.trim_end_matches('/').to_string(),
            _ => resolve_api_base(&app_origin).to_string(),
        };

        Ok(Self {
            market_api_base_url,
            app_origin,
            server_port,
            data_dir: PathBuf::from(env_var_or("DATA_DIR", "data")),
            static_dir: PathBuf::from(env_var_or("STATIC_DIR", "dashboard/dist")),
            default_ticker: env_var_or("DEFAULT_TICKER", "MSFT").to_uppercase(),
            default_investment,
            recalc_interval_ms,
            http_timeout_secs,
            keepalive_interval_secs,
        })
    }
}

/// Pick the market API host from the dashboard's own origin.
/// Local hosts and `file:` pages talk to the development server.
pub fn resolve_api_base(origin: &str) -> &'static str {
    let Ok(url) = reqwest::Url::parse(origin) else {
        tracing::warn!(origin = origin, "unparsable APP_ORIGIN, using production API");
        return PRODUCTION_API_BASE;
    };

    if url.scheme() == "file" {
        return LOCAL_API_BASE;
    }

    match url.host_str() {
        Some("localhost") | Some("127.0.0.1") => LOCAL_API_BASE,
        _ => PRODUCTION_API_BASE,
    }
}

fn env_var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_origins_use_dev_server() {
        assert_eq!(resolve_api_base("http://localhost:8080"), LOCAL_API_BASE);
        assert_eq!(resolve_api_base("http://127.0.0.1"), LOCAL_API_BASE);
        assert_eq!(resolve_api_base("file:///home/me/index.html"), LOCAL_API_BASE);
    }

    #[test]
    fn test_hosted_origin_uses_production() {
        assert_eq!(resolve_api_base("https://optiontracker.pages.dev"), PRODUCTION_API_BASE);
        assert_eq!(resolve_api_base("not a url"), PRODUCTION_API_BASE);
    }
}
