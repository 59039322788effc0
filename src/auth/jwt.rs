use jsonwebtoken::{decode, DecodingKey, Validation};

use crate::config::JwtConfig;
use crate::error::AppError;

use super::Claims;

pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
    required: bool,
}

impl JwtValidator {
    pub fn new(config: &JwtConfig) -> Self {
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        let mut validation = Validation::default();

        if let Some(ref issuer) = config.issuer {
            validation.set_issuer(&[issuer]);
        }

        if let Some(ref audience) = config.audience {
            validation.set_audience(&[audience]);
        }

        Self {
            decoding_key,
            validation,
            required: config.required,
        }
    }

    pub fn validate(&self, token: &str) -> Result<Claims, AppError> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AppError::Auth(format!("Invalid token: {}", e)))?;

        Ok(token_data.claims)
    }

    /// Resolve the optional token of a connecting client.
    ///
    /// A missing token is accepted as anonymous unless tokens are required.
    /// A token that is present must be valid.
    pub fn authenticate(&self, token: Option<&str>) -> Result<Option<Claims>, AppError> {
        match token {
            Some(token) => self.validate(token).map(Some),
            None if self.required => Err(AppError::Auth("Missing token".to_string())),
            None => Ok(None),
        }
    }
}
