use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

/// Claims of the access tokens issued by the HR login service.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: u64,
    pub sub: String,
    /// role id
    pub role: u8,
    pub exp: usize,
    pub jti: String,
    pub token_type: TokenType,
    /// Present only if this user is linked to an employee record
    pub employee_id: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub enum TokenType {
    Access,
    Refresh,
}

/// Decodes and checks an access token. Refresh tokens are refused.
pub fn verify_token(token: &str, secret: &str) -> Result<Claims, String> {
    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| e.to_string())?;

    if claims.token_type != TokenType::Access {
        return Err("not an access token".to_string());
    }
    Ok(claims)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use std::time::{SystemTime, UNIX_EPOCH};

    pub(crate) fn token(secret: &str, role: u8, employee_id: Option<u64>, token_type: TokenType) -> String {
        let exp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as usize
            + 600;
        let claims = Claims {
            user_id: 1,
            sub: "alice".into(),
            role,
            exp,
            jti: "test".into(),
            token_type,
            employee_id,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn access_token_is_accepted() {
        let claims = verify_token(&token("s3cret", 2, Some(12), TokenType::Access), "s3cret").unwrap();
        assert_eq!(claims.role, 2);
        assert_eq!(claims.employee_id, Some(12));
    }

    #[test]
    fn wrong_secret_and_refresh_tokens_are_refused() {
        assert!(verify_token(&token("s3cret", 1, None, TokenType::Access), "other").is_err());
        assert!(verify_token(&token("s3cret", 1, None, TokenType::Refresh), "s3cret").is_err());
    }
}
