//! The handler signature wrappers accept and return.
//!
//! A read or write handler is anything implementing [`Handler`]. The caching
//! wrappers implement it too, so wrapping is explicit composition at
//! registration time:
//!
//! ```ignore
//! let cached = Cacheable::new("detail:{item_id}", ttl, client, handler_fn(load_item))?;
//! let item = cached.call(args).await?;
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

#[async_trait]
pub trait Handler<A, T, E>: Send + Sync
where
    A: Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    async fn call(&self, args: A) -> Result<T, E>;
}

/// Adapts an async closure into a [`Handler`].
#[derive(Clone)]
pub struct HandlerFn<F> {
    f: F,
}

pub fn handler_fn<F>(f: F) -> HandlerFn<F> {
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut, A, T, E> Handler<A, T, E> for HandlerFn<F>
where
    F: Fn(A) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, E>> + Send,
    A: Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    async fn call(&self, args: A) -> Result<T, E> {
        (self.f)(args).await
    }
}

#[async_trait]
impl<H, A, T, E> Handler<A, T, E> for Arc<H>
where
    H: Handler<A, T, E> + ?Sized,
    A: Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    async fn call(&self, args: A) -> Result<T, E> {
        (**self).call(args).await
    }
}
