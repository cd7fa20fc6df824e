use crate::model::id::UserId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub is_superuser: bool,
}

impl User {
    pub fn new(id: UserId, is_superuser: bool) -> Self {
        Self { id, is_superuser }
    }
}
