//! In-process item repository.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::application::repos::{CreateItemParams, ItemsRepo, RepoError, UpdateItemParams};
use crate::cache::PrincipalId;
use crate::domain::items::{ItemPage, ItemQuery, ItemRecord, ItemSort, ItemStatus};

#[derive(Default)]
pub struct InMemoryItemsRepo {
    items: RwLock<HashMap<Uuid, ItemRecord>>,
}

impl InMemoryItemsRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait]
impl ItemsRepo for InMemoryItemsRepo {
    async fn list_items(
        &self,
        owner_id: &PrincipalId,
        query: &ItemQuery,
    ) -> Result<ItemPage, RepoError> {
        let items = self.items.read().await;
        let mut matching: Vec<ItemRecord> = items
            .values()
            .filter(|item| item.owner_id == *owner_id)
            .filter(|item| query.status.is_none_or(|status| item.status == status))
            .cloned()
            .collect();
        drop(items);

        match query.sort.unwrap_or_default() {
            ItemSort::Newest => {
                matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)))
            }
            ItemSort::Oldest => {
                matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            }
            ItemSort::Title => matching.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id))),
        }

        let page = query.page_or_default();
        let per_page = query.per_page_or_default();
        let total = matching.len() as u64;
        let skip = (page.saturating_sub(1) as usize).saturating_mul(per_page as usize);

        Ok(ItemPage {
            items: matching
                .into_iter()
                .skip(skip)
                .take(per_page as usize)
                .collect(),
            page,
            per_page,
            total,
        })
    }

    async fn find_item(&self, id: Uuid) -> Result<Option<ItemRecord>, RepoError> {
        Ok(self.items.read().await.get(&id).cloned())
    }

    async fn create_item(&self, params: CreateItemParams) -> Result<ItemRecord, RepoError> {
        let now = OffsetDateTime::now_utc();
        let record = ItemRecord {
            id: Uuid::new_v4(),
            owner_id: params.owner_id,
            title: params.title,
            notes: params.notes,
            status: ItemStatus::Active,
            created_at: now,
            updated_at: now,
        };

        self.items.write().await.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_item(&self, params: UpdateItemParams) -> Result<ItemRecord, RepoError> {
        let mut items = self.items.write().await;
        let item = items
            .get_mut(&params.id)
            .filter(|item| item.owner_id == params.owner_id)
            .ok_or(RepoError::NotFound)?;

        if let Some(title) = params.title {
            item.title = title;
        }
        if let Some(notes) = params.notes {
            item.notes = notes;
        }
        if let Some(status) = params.status {
            item.status = status;
        }
        item.updated_at = OffsetDateTime::now_utc();

        Ok(item.clone())
    }

    async fn delete_item(
        &self,
        owner_id: &PrincipalId,
        id: Uuid,
    ) -> Result<ItemRecord, RepoError> {
        let mut items = self.items.write().await;
        if !items.get(&id).is_some_and(|item| item.owner_id == *owner_id) {
            return Err(RepoError::NotFound);
        }
        items.remove(&id).ok_or(RepoError::NotFound)
    }
}
