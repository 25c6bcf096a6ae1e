//! Invalidation wrapper.
//!
//! `CacheEvict` runs a mutating handler and, only when it succeeds, deletes
//! every key its rule resolves. Eviction is best effort: a failed delete is
//! logged and counted, and the entry stays stale until its TTL runs out.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, instrument, warn};

use super::client::CacheClient;
use super::handler::Handler;
use super::keys::{ContextValue, KeyContext, KeyFields, PrincipalId, ResolvedKey};
use super::registry::OwnerIndex;
use super::template::{KeyError, KeyTemplate};

/// One key template to evict, with optional fixed slot values.
///
/// Fixed bindings take precedence over values from the call, which is how a
/// rule names a specific list-query shape under a `{query}` slot.
#[derive(Debug, Clone)]
pub struct EvictTarget {
    template: KeyTemplate,
    bindings: KeyContext,
}

impl EvictTarget {
    pub fn parse(template: &str) -> Result<Self, KeyError> {
        Ok(Self {
            template: KeyTemplate::parse(template)?,
            bindings: KeyContext::new(),
        })
    }

    pub fn bind(mut self, name: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        self.bindings.insert(name, value);
        self
    }

    pub fn template(&self) -> &KeyTemplate {
        &self.template
    }

    pub fn resolve(&self, context: &KeyContext) -> Result<ResolvedKey, KeyError> {
        if self.bindings.is_empty() {
            return self.template.resolve(context);
        }
        let mut merged = context.clone();
        merged.extend(self.bindings.clone());
        self.template.resolve(&merged)
    }
}

/// The set of keys a mutation evicts.
#[derive(Debug, Clone, Default)]
pub struct InvalidationRule {
    targets: Vec<EvictTarget>,
}

impl InvalidationRule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a target with no fixed bindings.
    pub fn target(self, template: &str) -> Result<Self, KeyError> {
        Ok(self.with(EvictTarget::parse(template)?))
    }

    pub fn with(mut self, target: EvictTarget) -> Self {
        self.targets.push(target);
        self
    }

    pub fn targets(&self) -> &[EvictTarget] {
        &self.targets
    }

    /// Resolve every target against `context`. Targets that cannot be
    /// resolved are logged and skipped.
    pub fn resolve(&self, context: &KeyContext) -> Vec<ResolvedKey> {
        self.targets
            .iter()
            .filter_map(|target| match target.resolve(context) {
                Ok(key) => Some(key),
                Err(error) => {
                    warn!(error = %error, "eviction target unresolved, skipped");
                    None
                }
            })
            .collect()
    }
}

/// Delete every key `rule` resolves from `context`, plus every key `index`
/// holds for `principal`.
///
/// Deletes run concurrently and each one is independent. Keys that were
/// deleted are dropped from the index. Returns how many keys could not be
/// deleted; those stay stale until their TTL runs out.
pub async fn evict_rule(
    client: &CacheClient,
    rule: &InvalidationRule,
    context: &KeyContext,
    index: Option<&OwnerIndex>,
    principal: Option<&PrincipalId>,
) -> usize {
    if !client.is_enabled() {
        return 0;
    }

    let mut keys = rule.resolve(context);
    if let (Some(index), Some(principal)) = (index, principal) {
        keys.extend(index.drain_owner(principal));
    }
    keys.sort();
    keys.dedup();

    let outcomes = join_all(keys.iter().map(|key| client.delete(key))).await;
    let failed = outcomes.iter().filter(|deleted| !**deleted).count();

    if let Some(index) = index {
        for (key, deleted) in keys.iter().zip(&outcomes) {
            if *deleted {
                index.unregister(key);
            }
        }
    }

    if failed > 0 {
        warn!(
            cache = "evict",
            evicted = keys.len() - failed,
            failed,
            "some cache entries were not invalidated"
        );
    } else {
        debug!(cache = "evict", evicted = keys.len(), "invalidated cache entries");
    }

    failed
}

pub struct CacheEvict<A, T, E, H> {
    rule: InvalidationRule,
    client: CacheClient,
    handler: H,
    index: Option<Arc<OwnerIndex>>,
    staleness: Duration,
    _marker: PhantomData<fn(A) -> Result<T, E>>,
}

impl<A, T, E, H> CacheEvict<A, T, E, H>
where
    A: KeyFields + Send + 'static,
    T: KeyFields + Send + 'static,
    E: Send + 'static,
    H: Handler<A, T, E>,
{
    /// Wrap `handler`, evicting `rule`'s keys after each successful call.
    ///
    /// Every slot must be supplied by the arguments, the handler's output, or
    /// a fixed binding on its target.
    pub fn new(rule: InvalidationRule, client: CacheClient, handler: H) -> Result<Self, KeyError> {
        for target in rule.targets() {
            target.template.ensure_supplied(|name| {
                A::FIELDS.contains(&name)
                    || T::FIELDS.contains(&name)
                    || target.bindings.contains(name)
            })?;
        }

        Ok(Self {
            rule,
            client,
            handler,
            index: None,
            staleness: Duration::ZERO,
            _marker: PhantomData,
        })
    }

    /// Also evict every key the index holds for the acting principal.
    pub fn with_owner_index(mut self, index: Arc<OwnerIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Declare how long entries this rule does not name may stay stale
    /// after a mutation, typically the collection TTL.
    pub fn bounded_staleness(mut self, bound: Duration) -> Self {
        self.staleness = bound;
        self
    }

    /// Worst-case staleness of entries outside the rule. Zero when the owner
    /// index covers them.
    pub fn staleness_bound(&self) -> Duration {
        if self.index.is_some() {
            Duration::ZERO
        } else {
            self.staleness
        }
    }

    pub fn rule(&self) -> &InvalidationRule {
        &self.rule
    }
}

#[async_trait]
impl<A, T, E, H> Handler<A, T, E> for CacheEvict<A, T, E, H>
where
    A: KeyFields + Send + 'static,
    T: KeyFields + Send + 'static,
    E: Send + 'static,
    H: Handler<A, T, E>,
{
    #[instrument(skip_all, fields(targets = self.rule.targets.len()))]
    async fn call(&self, args: A) -> Result<T, E> {
        if !self.client.is_enabled() {
            return self.handler.call(args).await;
        }

        let mut context = args.key_context();
        let principal = self
            .index
            .as_ref()
            .and_then(|_| args.principal().cloned());

        let output = self.handler.call(args).await?;
        context.extend(output.key_context());

        evict_rule(
            &self.client,
            &self.rule,
            &context,
            self.index.as_deref(),
            principal.as_ref(),
        )
        .await;

        Ok(output)
    }
}
