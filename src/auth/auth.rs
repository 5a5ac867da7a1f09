use actix_web::{FromRequest, HttpMessage, HttpRequest, dev::Payload, web::Data};
use futures::future::{Ready, ready};

use crate::auth::jwt::verify_token;
use crate::config::Config;
use crate::error::AppError;
use crate::model::role::Role;

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: u64,
    pub username: String,
    pub role: Role,

    /// Present only if this user is linked to an employee record
    pub employee_id: Option<u64>,
}

impl AuthUser {
    /// Builds the caller from a bearer token.
    pub fn from_token(token: &str, secret: &str) -> Result<Self, AppError> {
        let claims = verify_token(token, secret)
            .map_err(|_| AppError::Unauthorized("Invalid or expired token".into()))?;
        let role = Role::try_from(claims.role)
            .map_err(|_| AppError::Unauthorized("Invalid role".into()))?;

        Ok(AuthUser {
            user_id: claims.user_id,
            username: claims.sub,
            role,
            employee_id: claims.employee_id,
        })
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(AppError::Forbidden("Admin only".into()))
        }
    }

    pub fn require_hr_or_admin(&self) -> Result<(), AppError> {
        if self.role.manages_attendance() {
            Ok(())
        } else {
            Err(AppError::Forbidden("HR/Admin only".into()))
        }
    }

    /// Returns true if the user is an employee
    pub fn is_employee(&self) -> bool {
        self.role == Role::Employee
    }

    /// Employee whose attendance the caller may read.
    ///
    /// Employees are pinned to their own record; HR and admins may pick anyone or nobody.
    pub fn attendance_scope(&self, requested: Option<u64>) -> Result<Option<u64>, AppError> {
        if self.role.manages_attendance() {
            return Ok(requested);
        }
        if !self.is_employee() {
            return Err(AppError::Forbidden("Attendance is not visible to this role".into()));
        }
        let own = self
            .employee_id
            .ok_or_else(|| AppError::Forbidden("No employee profile".into()))?;
        match requested {
            Some(other) if other != own => Err(AppError::Forbidden(
                "Employees may only read their own attendance".into(),
            )),
            _ => Ok(Some(own)),
        }
    }
}

fn bearer(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

impl FromRequest for AuthUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        if let Some(user) = req.extensions().get::<AuthUser>() {
            return ready(Ok(user.clone()));
        }

        let Some(token) = bearer(req) else {
            return ready(Err(AppError::Unauthorized("Missing token".into()).into()));
        };
        let Some(config) = req.app_data::<Data<Config>>() else {
            return ready(Err(AppError::Store("Config missing".into()).into()));
        };

        ready(AuthUser::from_token(token, &config.jwt_secret).map_err(Into::into))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::{TokenType, tests::token};

    fn user(role: Role, employee_id: Option<u64>) -> AuthUser {
        AuthUser {
            user_id: 1,
            username: "alice".into(),
            role,
            employee_id,
        }
    }

    #[test]
    fn token_yields_user() {
        let u = AuthUser::from_token(&token("k", 3, Some(12), TokenType::Access), "k").unwrap();
        assert_eq!(u.role, Role::Employee);
        assert_eq!(u.employee_id, Some(12));

        let bad_role = AuthUser::from_token(&token("k", 42, None, TokenType::Access), "k");
        assert!(matches!(bad_role, Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn extractor_reuses_user_set_by_middleware() {
        let req = actix_web::test::TestRequest::default().to_http_request();
        req.extensions_mut().insert(user(Role::Hr, Some(7)));

        let extracted = AuthUser::from_request(&req, &mut Payload::None)
            .into_inner()
            .unwrap();
        assert_eq!(extracted.role, Role::Hr);
        assert_eq!(extracted.employee_id, Some(7));
    }

    #[test]
    fn extractor_without_token_is_unauthorized() {
        let req = actix_web::test::TestRequest::default().to_http_request();
        let err = AuthUser::from_request(&req, &mut Payload::None)
            .into_inner()
            .unwrap_err();
        assert_eq!(err.error_response().status(), actix_web::http::StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn guards() {
        assert!(user(Role::Admin, None).require_admin().is_ok());
        assert!(matches!(user(Role::Hr, None).require_admin(), Err(AppError::Forbidden(_))));
        assert!(user(Role::Hr, None).require_hr_or_admin().is_ok());
        assert!(user(Role::Employee, Some(1)).require_hr_or_admin().is_err());
    }

    #[test]
    fn employees_only_see_themselves() {
        let emp = user(Role::Employee, Some(12));
        assert_eq!(emp.attendance_scope(None).unwrap(), Some(12));
        assert_eq!(emp.attendance_scope(Some(12)).unwrap(), Some(12));
        assert!(emp.attendance_scope(Some(13)).is_err());
        assert!(user(Role::Employee, None).attendance_scope(None).is_err());
        assert!(user(Role::ApiUser, None).attendance_scope(None).is_err());

        assert_eq!(user(Role::Hr, None).attendance_scope(Some(13)).unwrap(), Some(13));
        assert_eq!(user(Role::Admin, None).attendance_scope(None).unwrap(), None);
    }
}
