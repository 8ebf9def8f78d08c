use async_trait::async_trait;
use axum::extract::{FromRequest, RequestParts};
use oso::PolarClass;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{unauthenticated_error, Error};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const ROLES_HEADER: &str = "x-user-roles";

/// The caller of an operation. Identity is established by the gateway in
/// front of the service; roles are one or more of `customer`, `driver`,
/// `admin` and `system`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub roles: Vec<String>,
}

impl User {
    pub fn new(id: Uuid, roles: &[&str]) -> Self {
        Self {
            id,
            roles: roles.iter().map(|role| role.to_string()).collect(),
        }
    }

    pub fn new_system_user() -> Self {
        Self {
            id: Uuid::new_v4(),
            roles: vec!["system".into()],
        }
    }

    pub fn is(&self, role: &str) -> bool {
        self.roles.iter().any(|x| x == role)
    }

    /// Admins and the system user see every record.
    pub fn is_privileged(&self) -> bool {
        self.is("admin") || self.is("system")
    }

    fn id_equals(&self, id: Uuid) -> bool {
        self.id == id
    }

    fn id_equals_nullable_id(&self, optional_id: Option<Uuid>) -> bool {
        optional_id.map_or(false, |id| self.id == id)
    }

    fn has_role(&self, role: String) -> bool {
        self.is(&role)
    }
}

impl PolarClass for User {
    fn get_polar_class_builder() -> oso::ClassBuilder<User> {
        oso::Class::builder()
            .name("User")
            .add_attribute_getter("id", |recv: &User| recv.id)
            .add_attribute_getter("roles", |recv: &User| recv.roles.clone())
            .add_method("id_equals", User::id_equals)
            .add_method("id_equals_nullable_id", User::id_equals_nullable_id)
            .add_method("has_role", User::has_role)
    }

    fn get_polar_class() -> oso::Class {
        let builder = User::get_polar_class_builder();
        builder.build()
    }
}

#[async_trait]
impl<B: Send> FromRequest<B> for User {
    type Rejection = Error;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let headers = req.headers();

        let id = headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value.trim()).ok())
            .ok_or_else(unauthenticated_error)?;

        let roles: Vec<String> = headers
            .get(ROLES_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|value| {
                value
                    .split(',')
                    .map(|role| role.trim().to_lowercase())
                    .filter(|role| !role.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        if roles.is_empty() {
            return Err(unauthenticated_error());
        }

        Ok(Self { id, roles })
    }
}

#[test]
fn extracts_user_from_headers_test() {
    use axum::http::Request;
    use tokio_test::block_on;

    let id = Uuid::new_v4();
    let request = Request::builder()
        .header(USER_ID_HEADER, id.to_string())
        .header(ROLES_HEADER, "Customer, driver,")
        .body(())
        .unwrap();

    let user = block_on(User::from_request(&mut RequestParts::new(request))).unwrap();

    assert_eq!(user.id, id);
    assert_eq!(user.roles, vec!["customer".to_string(), "driver".to_string()]);
}

#[test]
fn rejects_missing_identity_test() {
    use axum::http::Request;
    use tokio_test::block_on;

    let request = Request::builder()
        .header(ROLES_HEADER, "customer")
        .body(())
        .unwrap();
    let err = block_on(User::from_request(&mut RequestParts::new(request))).unwrap_err();
    assert_eq!(err, unauthenticated_error());

    let request = Request::builder()
        .header(USER_ID_HEADER, "not-a-uuid")
        .header(ROLES_HEADER, "customer")
        .body(())
        .unwrap();
    assert!(block_on(User::from_request(&mut RequestParts::new(request))).is_err());

    let request = Request::builder()
        .header(USER_ID_HEADER, Uuid::new_v4().to_string())
        .body(())
        .unwrap();
    assert!(block_on(User::from_request(&mut RequestParts::new(request))).is_err());
}
