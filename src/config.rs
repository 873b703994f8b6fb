use std::env;

/// Server configuration, read from the environment. Everything has a dev
/// default; an unset master key disables admin auth entirely.
#[derive(Clone, Debug)]
pub struct Config {
    /// Listen address, e.g. `0.0.0.0:8080`.
    pub addr: String,
    pub db_path: String,
    /// Bearer token required on admin routes and accepted on client routes.
    /// None means auth is disabled (dev mode).
    pub master_key: Option<String>,
    pub cors_enabled: bool,
}

impl Config {
    pub fn load() -> Config {
        let port = env::var("FLAGWIRE_PORT").unwrap_or_else(|_| "8080".to_string());
        Config {
            addr: format!("0.0.0.0:{port}"),
            db_path: env::var("FLAGWIRE_DB_PATH").unwrap_or_else(|_| "flagwire.db".to_string()),
            master_key: env::var("FLAGWIRE_MASTER_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            cors_enabled: env::var("FLAGWIRE_CORS").as_deref() != Ok("false"),
        }
    }
}
