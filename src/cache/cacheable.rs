//! Read-through wrapper.
//!
//! `Cacheable` resolves a key from the call's arguments, serves a cached value
//! when one exists, and otherwise runs the wrapped handler and stores its
//! result. A hit never runs the handler, so only side-effect-free handlers
//! may be wrapped.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use super::client::CacheClient;
use super::handler::Handler;
use super::keys::{KeyFields, Owned};
use super::registry::OwnerIndex;
use super::template::{KeyError, KeyTemplate};

const METRIC_CACHE_OWNER_REJECT: &str = "cachet_cache_owner_reject_total";

type OwnershipCheck<A, T> = Box<dyn Fn(&A, &T) -> bool + Send + Sync>;

pub struct Cacheable<A, T, E, H> {
    template: KeyTemplate,
    ttl: Duration,
    client: CacheClient,
    handler: H,
    ownership: Option<OwnershipCheck<A, T>>,
    index: Option<Arc<OwnerIndex>>,
    _marker: PhantomData<fn(A) -> Result<T, E>>,
}

impl<A, T, E, H> Cacheable<A, T, E, H>
where
    A: KeyFields + Send + 'static,
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
    E: Send + 'static,
    H: Handler<A, T, E>,
{
    /// Wrap `handler`, caching its results under `template` for `ttl`.
    ///
    /// Fails if the template is malformed or names a field `A` does not
    /// declare in [`KeyFields::FIELDS`].
    pub fn new(
        template: &str,
        ttl: Duration,
        client: CacheClient,
        handler: H,
    ) -> Result<Self, KeyError> {
        let template = KeyTemplate::parse(template)?;
        template.ensure_supplied(|name| A::FIELDS.contains(&name))?;

        Ok(Self {
            template,
            ttl,
            client,
            handler,
            ownership: None,
            index: None,
            _marker: PhantomData,
        })
    }

    /// Re-validate every hit with `check` before serving it.
    ///
    /// A hit that fails the check is not served; the call falls through to
    /// the handler so the caller sees exactly what a cold lookup returns.
    pub fn verify_ownership(
        mut self,
        check: impl Fn(&A, &T) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.ownership = Some(Box::new(check));
        self
    }

    /// Record populated keys under the calling principal.
    pub fn with_owner_index(mut self, index: Arc<OwnerIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn template(&self) -> &KeyTemplate {
        &self.template
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl<A, T, E, H> Cacheable<A, T, E, H>
where
    A: KeyFields + Send + 'static,
    T: Owned + Serialize + DeserializeOwned + Send + Sync + 'static,
    E: Send + 'static,
    H: Handler<A, T, E>,
{
    /// Only serve hits owned by the calling principal. Calls without a
    /// principal never hit.
    pub fn verify_owner(self) -> Self {
        self.verify_ownership(|args: &A, value: &T| {
            args.principal()
                .is_some_and(|principal| value.is_owned_by(principal))
        })
    }
}

#[async_trait]
impl<A, T, E, H> Handler<A, T, E> for Cacheable<A, T, E, H>
where
    A: KeyFields + Send + 'static,
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
    E: Send + 'static,
    H: Handler<A, T, E>,
{
    #[instrument(skip_all, fields(template = %self.template))]
    async fn call(&self, args: A) -> Result<T, E> {
        if !self.client.is_enabled() {
            return self.handler.call(args).await;
        }

        let key = match self.template.resolve(&args.key_context()) {
            Ok(key) => key,
            Err(error) => {
                warn!(error = %error, "cache key unresolved, calling handler uncached");
                return self.handler.call(args).await;
            }
        };

        if let Some(cached) = self.client.get::<T>(&key).await {
            let permitted = self
                .ownership
                .as_ref()
                .is_none_or(|check| check(&args, &cached));
            if permitted {
                if let Some(index) = &self.index {
                    index.touch(&key);
                }
                debug!(cache = "read_through", outcome = "hit", key = %key);
                return Ok(cached);
            }

            counter!(METRIC_CACHE_OWNER_REJECT).increment(1);
            debug!(
                cache = "read_through",
                outcome = "owner_mismatch",
                key = %key,
                "cached entry not served to this principal"
            );
            drop(cached);
            return self.handler.call(args).await;
        }

        debug!(cache = "read_through", outcome = "miss", key = %key);

        let owner = self
            .index
            .as_ref()
            .and_then(|_| args.principal().cloned());
        let value = self.handler.call(args).await?;

        if self.client.set(&key, &value, self.ttl).await
            && let (Some(index), Some(owner)) = (&self.index, owner)
            && let Some(displaced) = index.register(owner, key)
        {
            // No longer tracked for its owner, so it must not outlive a write.
            self.client.delete(&displaced).await;
        }

        Ok(value)
    }
}
