//! Environment-sourced worker settings.

use serde::Deserialize;

use crate::error::SagaResult;

/// Settings shared by every worker process.
///
/// Read from the environment with the `SAGA` prefix (`SAGA_BROKER_URL`,
/// `SAGA_DATABASE_URL`), `.env` files honored.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub broker_url: String,
    pub database_url: Option<String>,
}

impl Settings {
    pub fn load() -> SagaResult<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .set_default("broker_url", "redis://127.0.0.1:6379")?
            .add_source(config::Environment::with_prefix("SAGA"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
