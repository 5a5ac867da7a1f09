use actix_web::HttpRequest;

use crate::error::AppError;

pub const DEVICE_KEY_HEADER: &str = "X-Device-Key";

/// Shared-secret check for device deliveries. With no secret configured every
/// delivery is accepted.
pub fn check_device_key(req: &HttpRequest, secret: Option<&str>) -> Result<(), AppError> {
    let Some(secret) = secret else {
        return Ok(());
    };
    let presented = req
        .headers()
        .get(DEVICE_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized(format!("Missing {DEVICE_KEY_HEADER} header")))?;

    if constant_time_eq(presented.as_bytes(), secret.as_bytes()) {
        Ok(())
    } else {
        Err(AppError::Unauthorized("Invalid device key".into()))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
