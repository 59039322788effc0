use std::sync::Arc;
use std::time::Instant;

use crate::auth::JwtValidator;
use crate::config::Settings;
use crate::manager::ScaledPoolManager;
use crate::pool::PoolError;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    /// `None` when no JWT secret is configured
    pub jwt_validator: Option<Arc<JwtValidator>>,
    pub pool_manager: Arc<ScaledPoolManager>,
    pub start_time: Instant,
}

impl AppState {
    /// Build the state and create the configured pools in order
    pub fn new(settings: Settings) -> Result<Self, PoolError> {
        let jwt_validator = settings
            .jwt
            .as_ref()
            .map(|jwt| Arc::new(JwtValidator::new(jwt)));

        let pool_manager = Arc::new(ScaledPoolManager::new(
            settings.pool.clone(),
            settings.scale.clone(),
        ));

        for pool_id in &settings.pools {
            pool_manager
                .manager()
                .create_pool(pool_id, settings.pool_override(pool_id))?;
        }

        tracing::info!(
            pools = settings.pools.len(),
            strategy = settings.pool.load_balancing.as_str(),
            jwt_enabled = jwt_validator.is_some(),
            "Pools created"
        );

        Ok(Self {
            settings: Arc::new(settings),
            jwt_validator,
            pool_manager,
            start_time: Instant::now(),
        })
    }
}
