use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ServiceError;

/// Role carried by the authenticated caller. Administrators may inspect any
/// order and change order statuses; customers only act on their own data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Customer,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "customer" => Some(Role::Customer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Customer => "customer",
        }
    }
}

/// Identity established by the authentication layer in front of this service.
/// The gateway injects it either as a request extension or as trusted
/// `x-user-id` / `x-user-role` headers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Admins may act on any user's data; everyone else only on their own.
    pub fn can_access_user(&self, user_id: Uuid) -> bool {
        self.is_admin() || self.user_id == user_id
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(*user);
        }

        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v).ok())
            .ok_or_else(|| {
                ServiceError::Unauthorized("missing or invalid x-user-id header".into())
            })?;

        let role = parts
            .headers
            .get("x-user-role")
            .and_then(|v| v.to_str().ok())
            .and_then(Role::parse)
            .unwrap_or(Role::Customer);

        Ok(AuthUser { user_id, role })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_for(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/api/v1/orders");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn extracts_identity_from_headers() {
        let id = Uuid::new_v4();
        let id_str = id.to_string();
        let mut parts = parts_for(&[("x-user-id", id_str.as_str())]);
        let user = AuthUser::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(user.user_id, id);
        assert_eq!(user.role, Role::Customer);
    }

    #[tokio::test]
    async fn admin_role_header_is_honoured() {
        let id = Uuid::new_v4();
        let id_str = id.to_string();
        let mut parts = parts_for(&[("x-user-id", id_str.as_str()), ("x-user-role", "admin")]);
        let user = AuthUser::from_request_parts(&mut parts, &()).await.unwrap();
        assert!(user.is_admin());
        assert!(user.can_access_user(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn missing_identity_is_unauthorized() {
        let mut parts = parts_for(&[]);
        let result = AuthUser::from_request_parts(&mut parts, &()).await;
        assert!(matches!(result, Err(ServiceError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn extension_takes_precedence_over_headers() {
        let ext_user = AuthUser {
            user_id: Uuid::new_v4(),
            role: Role::Admin,
        };
        let header_id = Uuid::new_v4().to_string();
        let mut parts = parts_for(&[("x-user-id", header_id.as_str())]);
        parts.extensions.insert(ext_user);
        let user = AuthUser::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(user, ext_user);
    }

    #[test]
    fn customers_cannot_cross_accounts() {
        let user = AuthUser {
            user_id: Uuid::new_v4(),
            role: Role::Customer,
        };
        assert!(user.can_access_user(user.user_id));
        assert!(!user.can_access_user(Uuid::new_v4()));
    }
}
