//! Shared application state

use sqlx::PgPool;

use crate::{auth::JwtManager, config::Config, email::MailService};

/// State shared across all request handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub jwt_manager: JwtManager,
    pub mailer: MailService,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let jwt_manager = JwtManager::new(&config.jwt_secret, config.access_token_ttl_minutes);
        let mailer = MailService::from_env(config.public_url.clone());

        Self {
            pool,
            config,
            jwt_manager,
            mailer,
        }
    }
}
