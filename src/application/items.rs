//! Item reads and writes, cached per owner.
//!
//! Lists are cached under `list:{owner}:{query}` with the short collection
//! TTL; single items under `detail:{item_id}` with the long entity TTL and an
//! ownership check on every hit. Create, update and delete evict the item's
//! detail key and the owner's list under each common query shape; a status
//! change also evicts the two status-filtered shapes. Lists under any other
//! shape may serve pre-mutation results for up to
//! [`ItemService::list_staleness_bound`].

use std::sync::Arc;
use std::time::Duration;

use metrics::gauge;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::application::repos::{CreateItemParams, ItemsRepo, RepoError, UpdateItemParams};
use crate::cache::{
    CacheClient, CacheConfig, CacheEvict, Cacheable, EvictTarget, Handler, InvalidationRule,
    KeyContext, KeyError, KeyFields, Owned, OwnerIndex, PrincipalId, evict_rule, handler_fn,
};
use crate::domain::error::DomainError;
use crate::domain::items::{ItemPage, ItemQuery, ItemRecord, ItemStatus, normalize_title};

pub const LIST_KEY: &str = "list:{owner}:{query}";
pub const DETAIL_KEY: &str = "detail:{item_id}";

const METRIC_LIST_STALENESS_BOUND: &str = "cachet_cache_list_staleness_bound_ms";

#[derive(Debug, Error)]
pub enum ItemError {
    #[error("item not found")]
    NotFound,
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repo(RepoError),
}

impl From<RepoError> for ItemError {
    fn from(error: RepoError) -> Self {
        match error {
            RepoError::NotFound => ItemError::NotFound,
            other => ItemError::Repo(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateItemCommand {
    pub title: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateItemCommand {
    pub title: Option<String>,
    pub notes: Option<Option<String>>,
    pub status: Option<ItemStatus>,
}

impl KeyFields for ItemRecord {
    const FIELDS: &'static [&'static str] = &["item_id", "owner"];

    fn key_context(&self) -> KeyContext {
        KeyContext::new()
            .with("item_id", self.id)
            .with("owner", &self.owner_id)
    }
}

struct ListItems {
    principal: PrincipalId,
    query: ItemQuery,
}

impl KeyFields for ListItems {
    const FIELDS: &'static [&'static str] = &["owner", "query"];

    fn key_context(&self) -> KeyContext {
        KeyContext::new()
            .with("owner", &self.principal)
            .with_query("query", self.query.to_value())
    }

    fn principal(&self) -> Option<&PrincipalId> {
        Some(&self.principal)
    }
}

/// Arguments of the single-item operations: who is asking, about which item.
struct ItemRef {
    principal: PrincipalId,
    item_id: Uuid,
}

impl KeyFields for ItemRef {
    const FIELDS: &'static [&'static str] = &["owner", "item_id"];

    fn key_context(&self) -> KeyContext {
        KeyContext::new()
            .with("owner", &self.principal)
            .with("item_id", self.item_id)
    }

    fn principal(&self) -> Option<&PrincipalId> {
        Some(&self.principal)
    }
}

struct CreateItem {
    principal: PrincipalId,
    title: String,
    notes: Option<String>,
}

impl KeyFields for CreateItem {
    const FIELDS: &'static [&'static str] = &["owner"];

    fn key_context(&self) -> KeyContext {
        KeyContext::new().with("owner", &self.principal)
    }

    fn principal(&self) -> Option<&PrincipalId> {
        Some(&self.principal)
    }
}

struct UpdateItem {
    target: ItemRef,
    command: UpdateItemCommand,
}

impl KeyFields for UpdateItem {
    const FIELDS: &'static [&'static str] = ItemRef::FIELDS;

    fn key_context(&self) -> KeyContext {
        self.target.key_context()
    }

    fn principal(&self) -> Option<&PrincipalId> {
        self.target.principal()
    }
}

type ItemHandler<A, T> = Arc<dyn Handler<A, T, ItemError>>;

#[derive(Clone)]
pub struct ItemService {
    repo: Arc<dyn ItemsRepo>,
    cache: CacheClient,
    index: Option<Arc<OwnerIndex>>,
    status_rule: InvalidationRule,
    list_staleness: Duration,
    list: ItemHandler<ListItems, ItemPage>,
    detail: ItemHandler<ItemRef, ItemRecord>,
    create: ItemHandler<CreateItem, ItemRecord>,
    update: ItemHandler<UpdateItem, ItemRecord>,
    update_status: ItemHandler<UpdateItem, ItemRecord>,
    delete: ItemHandler<ItemRef, ItemRecord>,
}

impl ItemService {
    pub fn new(
        repo: Arc<dyn ItemsRepo>,
        cache: CacheClient,
        config: &CacheConfig,
    ) -> Result<Self, KeyError> {
        let index = config
            .uses_owner_index()
            .then(|| Arc::new(OwnerIndex::new(config.store_capacity_non_zero())));
        let list_staleness = if cache.is_enabled() {
            config.list_staleness_bound()
        } else {
            Duration::ZERO
        };
        gauge!(METRIC_LIST_STALENESS_BOUND).set(list_staleness.as_millis() as f64);

        let list = {
            let repo = repo.clone();
            let loader = handler_fn(move |args: ListItems| {
                let repo = repo.clone();
                async move {
                    repo.list_items(&args.principal, &args.query)
                        .await
                        .map_err(ItemError::from)
                }
            });
            let cached = Cacheable::new(LIST_KEY, config.list_ttl(), cache.clone(), loader)?
                .verify_owner();
            match &index {
                Some(index) => cached.with_owner_index(index.clone()),
                None => cached,
            }
        };

        let detail = {
            let repo = repo.clone();
            let loader = handler_fn(move |args: ItemRef| {
                let repo = repo.clone();
                async move {
                    repo.find_item(args.item_id)
                        .await?
                        .filter(|item| item.is_owned_by(&args.principal))
                        .ok_or(ItemError::NotFound)
                }
            });
            let cached = Cacheable::new(DETAIL_KEY, config.detail_ttl(), cache.clone(), loader)?
                .verify_owner();
            match &index {
                Some(index) => cached.with_owner_index(index.clone()),
                None => cached,
            }
        };

        let rule = write_rule(&config.common_list_queries)?;
        let status_rule = status_rule(&config.common_list_queries)?;
        let evicting = Evicting {
            cache: &cache,
            index: index.as_ref(),
            staleness: config.list_ttl(),
        };

        let create = {
            let repo = repo.clone();
            evicting.wrap(&rule, handler_fn(move |args: CreateItem| {
                let repo = repo.clone();
                async move {
                    repo.create_item(CreateItemParams {
                        owner_id: args.principal,
                        title: args.title,
                        notes: args.notes,
                    })
                    .await
                    .map_err(ItemError::from)
                }
            }))?
        };

        let update_loader = |repo: Arc<dyn ItemsRepo>| {
            handler_fn(move |args: UpdateItem| {
                let repo = repo.clone();
                async move {
                    repo.update_item(UpdateItemParams {
                        id: args.target.item_id,
                        owner_id: args.target.principal,
                        title: args.command.title,
                        notes: args.command.notes,
                        status: args.command.status,
                    })
                    .await
                    .map_err(ItemError::from)
                }
            })
        };
        let update = evicting.wrap(&rule, update_loader(repo.clone()))?;
        let update_status = evicting.wrap(&status_rule, update_loader(repo.clone()))?;

        let delete = {
            let repo = repo.clone();
            evicting.wrap(&rule, handler_fn(move |args: ItemRef| {
                let repo = repo.clone();
                async move {
                    repo.delete_item(&args.principal, args.item_id)
                        .await
                        .map_err(ItemError::from)
                }
            }))?
        };

        Ok(Self {
            repo,
            cache,
            index,
            status_rule,
            list_staleness,
            list: Arc::new(list),
            detail: Arc::new(detail),
            create,
            update,
            update_status,
            delete,
        })
    }

    pub async fn list_items(
        &self,
        principal: &PrincipalId,
        query: ItemQuery,
    ) -> Result<ItemPage, ItemError> {
        query.validate()?;
        self.list
            .call(ListItems {
                principal: principal.clone(),
                query,
            })
            .await
    }

    pub async fn get_item(
        &self,
        principal: &PrincipalId,
        item_id: Uuid,
    ) -> Result<ItemRecord, ItemError> {
        self.detail
            .call(ItemRef {
                principal: principal.clone(),
                item_id,
            })
            .await
    }

    pub async fn create_item(
        &self,
        principal: &PrincipalId,
        command: CreateItemCommand,
    ) -> Result<ItemRecord, ItemError> {
        let title = normalize_title(&command.title)?;
        self.create
            .call(CreateItem {
                principal: principal.clone(),
                title,
                notes: command.notes,
            })
            .await
    }

    pub async fn update_item(
        &self,
        principal: &PrincipalId,
        item_id: Uuid,
        mut command: UpdateItemCommand,
    ) -> Result<ItemRecord, ItemError> {
        if let Some(title) = command.title.as_deref() {
            command.title = Some(normalize_title(title)?);
        }
        let handler = if command.status.is_some() {
            &self.update_status
        } else {
            &self.update
        };
        handler
            .call(UpdateItem {
                target: ItemRef {
                    principal: principal.clone(),
                    item_id,
                },
                command,
            })
            .await
    }

    pub async fn delete_item(&self, principal: &PrincipalId, item_id: Uuid) -> Result<(), ItemError> {
        self.delete
            .call(ItemRef {
                principal: principal.clone(),
                item_id,
            })
            .await?;
        Ok(())
    }

    /// Archive an item, evicting by hand through [`evict_rule`].
    ///
    /// Archiving moves the item between the active and archived listings, so
    /// it evicts the same keys as a status-changing update.
    pub async fn archive_item(
        &self,
        principal: &PrincipalId,
        item_id: Uuid,
    ) -> Result<ItemRecord, ItemError> {
        let record = self
            .repo
            .update_item(UpdateItemParams {
                id: item_id,
                owner_id: principal.clone(),
                title: None,
                notes: None,
                status: Some(ItemStatus::Archived),
            })
            .await?;

        evict_rule(
            &self.cache,
            &self.status_rule,
            &record.key_context(),
            self.index.as_deref(),
            Some(principal),
        )
        .await;

        Ok(record)
    }

    /// Longest a list cached under an uncommon query shape can lag behind a
    /// write.
    pub fn list_staleness_bound(&self) -> Duration {
        self.list_staleness
    }

    pub fn cache(&self) -> &CacheClient {
        &self.cache
    }

    pub fn owner_index(&self) -> Option<&Arc<OwnerIndex>> {
        self.index.as_ref()
    }
}

/// Detail key plus the owner's list under every common query shape.
fn write_rule(common_queries: &[Value]) -> Result<InvalidationRule, KeyError> {
    let mut rule = InvalidationRule::new().target(DETAIL_KEY)?;
    for query in canonical_shapes(common_queries) {
        rule = rule.with(list_target(query)?);
    }
    Ok(rule)
}

/// [`write_rule`] plus the active and archived listings a status change
/// moves the item between.
fn status_rule(common_queries: &[Value]) -> Result<InvalidationRule, KeyError> {
    let mut rule = write_rule(common_queries)?;
    for status in [ItemStatus::Active, ItemStatus::Archived] {
        rule = rule.with(list_target(
            ItemQuery::default().with_status(status).to_value(),
        )?);
    }
    Ok(rule)
}

fn list_target(query: Value) -> Result<EvictTarget, KeyError> {
    Ok(EvictTarget::parse(LIST_KEY)?.bind("query", query))
}

/// Common shapes in the form list keys are built from. Shapes that are not
/// list queries could never match a key and are skipped.
fn canonical_shapes(common_queries: &[Value]) -> Vec<Value> {
    let mut shapes: Vec<Value> = Vec::with_capacity(common_queries.len());
    for shape in common_queries {
        match ItemQuery::from_shape(shape) {
            Ok(query) => {
                let value = query.to_value();
                if !shapes.contains(&value) {
                    shapes.push(value);
                }
            }
            Err(error) => warn!(error = %error, "common list query skipped"),
        }
    }
    shapes
}

struct Evicting<'a> {
    cache: &'a CacheClient,
    index: Option<&'a Arc<OwnerIndex>>,
    staleness: Duration,
}

impl Evicting<'_> {
    fn wrap<A, H>(
        &self,
        rule: &InvalidationRule,
        handler: H,
    ) -> Result<ItemHandler<A, ItemRecord>, KeyError>
    where
        A: KeyFields + Send + 'static,
        H: Handler<A, ItemRecord, ItemError> + 'static,
    {
        let wrapped = CacheEvict::new(rule.clone(), self.cache.clone(), handler)?
            .bounded_staleness(self.staleness);
        let wrapped = match self.index {
            Some(index) => wrapped.with_owner_index(index.clone()),
            None => wrapped,
        };
        Ok(Arc::new(wrapped))
    }
}
