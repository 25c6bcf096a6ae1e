//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::cache::PrincipalId;
use crate::domain::items::{ItemPage, ItemQuery, ItemRecord, ItemStatus};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct CreateItemParams {
    pub owner_id: PrincipalId,
    pub title: String,
    pub notes: Option<String>,
}

/// Partial update; `None` leaves a field unchanged.
#[derive(Debug, Clone)]
pub struct UpdateItemParams {
    pub id: Uuid,
    pub owner_id: PrincipalId,
    pub title: Option<String>,
    pub notes: Option<Option<String>>,
    pub status: Option<ItemStatus>,
}

/// Item persistence. Writes are scoped to the owner: touching an item the
/// owner does not hold is `RepoError::NotFound`.
#[async_trait]
pub trait ItemsRepo: Send + Sync {
    async fn list_items(
        &self,
        owner_id: &PrincipalId,
        query: &ItemQuery,
    ) -> Result<ItemPage, RepoError>;

    async fn find_item(&self, id: Uuid) -> Result<Option<ItemRecord>, RepoError>;

    async fn create_item(&self, params: CreateItemParams) -> Result<ItemRecord, RepoError>;

    async fn update_item(&self, params: UpdateItemParams) -> Result<ItemRecord, RepoError>;

    /// Removes the item and returns it as it was.
    async fn delete_item(&self, owner_id: &PrincipalId, id: Uuid)
    -> Result<ItemRecord, RepoError>;
}
