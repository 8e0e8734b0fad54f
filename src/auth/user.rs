use oso::PolarClass;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An authenticated caller as supplied by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub roles: Vec<String>,
}

impl User {
    pub fn new(id: Uuid) -> Self {
        Self { id, roles: vec![] }
    }

    pub fn new_system_user() -> Self {
        Self {
            id: Uuid::new_v4(),
            roles: vec!["system".into()],
        }
    }

    pub fn has_role(&self, role: String) -> bool {
        self.roles.iter().any(|x| x == &role)
    }
}

impl PolarClass for User {
    fn get_polar_class_builder() -> oso::ClassBuilder<User> {
        oso::Class::builder()
            .name("User")
            .add_attribute_getter("id", |recv: &User| recv.id.to_string())
            .add_attribute_getter("roles", |recv: &User| recv.roles.clone())
            .add_method("has_role", User::has_role)
    }

    fn get_polar_class() -> oso::Class {
        let builder = User::get_polar_class_builder();
        builder.build()
    }
}
