use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered account as seen by the domain rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub is_staff: bool,
}

/// Whoever is making a request. Anonymous callers never pass a permission check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Principal {
    #[default]
    Anonymous,
    User(User),
}

impl Principal {
    pub fn user(&self) -> Option<&User> {
        match self {
            Principal::User(user) => Some(user),
            Principal::Anonymous => None,
        }
    }

    pub fn id(&self) -> Option<Uuid> {
        self.user().map(|u| u.id)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Principal::User(_))
    }

    pub fn is_staff(&self) -> bool {
        self.user().map(|u| u.is_staff).unwrap_or(false)
    }
}

impl From<User> for Principal {
    fn from(user: User) -> Self {
        Principal::User(user)
    }
}

impl From<Option<User>> for Principal {
    fn from(user: Option<User>) -> Self {
        user.map(Principal::User).unwrap_or_default()
    }
}
