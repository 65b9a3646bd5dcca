// ABOUTME: Errors reported by the in-memory stores and the name index.
// ABOUTME: NotExist is the not-found class callers branch on.

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} does not exist")]
    NotExist(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("name {name:?} is reserved for {key:?}")]
    NameReserved { name: String, key: String },

    #[error("{key:?} has already reserved name {name:?}")]
    KeyReserved { key: String, name: String },
}

impl StoreError {
    pub fn is_not_exist(&self) -> bool {
        matches!(self, StoreError::NotExist(_))
    }
}
