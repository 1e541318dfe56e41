use crate::error::{AppError, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Claims of the bearer token issued by the host application.
/// `sub` carries the numeric user id.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
}

impl Claims {
    pub fn user_id(&self) -> Result<i64> {
        let id: i64 = self
            .sub
            .parse()
            .map_err(|_| AppError::Unauthorized("Invalid token subject".to_string()))?;
        // 0 is the system sender and can never authenticate
        if id <= 0 {
            return Err(AppError::Unauthorized("Invalid token subject".to_string()));
        }
        Ok(id)
    }
}

/// Issues a token. Session issuance belongs to the host application; this is
/// used by tooling and tests.
pub fn create_jwt(user_id: i64, secret: &str, expiration_hours: i64) -> Result<String> {
    let expiration = Utc::now()
        .checked_add_signed(Duration::hours(expiration_hours))
        .ok_or(AppError::InternalError)?
        .timestamp();

    let claims = Claims {
        sub: user_id.to_string(),
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|_| AppError::InternalError)
}

pub fn verify_jwt(token: &str, secret: &str) -> Result<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::Unauthorized("Invalid or expired token".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip_yields_user_id() {
        let token = create_jwt(17, "secret", 1).unwrap();
        let claims = verify_jwt(&token, "secret").unwrap();
        assert_eq!(claims.user_id().unwrap(), 17);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = create_jwt(17, "secret", 1).unwrap();
        assert!(matches!(
            verify_jwt(&token, "other"),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn system_subject_cannot_authenticate() {
        let claims = Claims { sub: "0".to_string(), exp: 0 };
        assert!(claims.user_id().is_err());
    }
}
