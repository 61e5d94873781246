//! The per-item operation and its timeout-bounded invocation
//!
//! Operations are asynchronous and may take minutes or hours. The runner only
//! imposes a deadline on them. Outcomes are classified as data
//! ([`Invocation`]) rather than by inspecting error types; a panic is the
//! only way an operation can escape classification.

use crate::backup::Artifact;
use crate::error::ItemError;
use crate::item::Item;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Work applied to every item of a collection
///
/// Extra parameters (what used to be keyword arguments) live in the
/// implementing type.
#[async_trait]
pub trait Operation<P>: Send + Sync + 'static
where
    P: Send + Sync + 'static,
{
    /// Successful result, persisted to the backup store
    type Output: Artifact;

    /// Process one item
    async fn call(&self, item: Arc<Item<P>>) -> Result<Self::Output, ItemError>;
}

/// Operation built from an async closure
pub struct FnOperation<F> {
    f: F,
}

/// Wrap an async closure as an [`Operation`]
///
/// ```ignore
/// let op = operation_fn(|item: Arc<Item<()>>| async move {
///     Ok::<_, ItemError>(item.name.len() as u64)
/// });
/// ```
pub fn operation_fn<F>(f: F) -> FnOperation<F> {
    FnOperation { f }
}

#[async_trait]
impl<P, F, Fut, T> Operation<P> for FnOperation<F>
where
    P: Send + Sync + 'static,
    F: Fn(Arc<Item<P>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ItemError>> + Send + 'static,
    T: Artifact,
{
    type Output = T;

    async fn call(&self, item: Arc<Item<P>>) -> Result<T, ItemError> {
        (self.f)(item).await
    }
}

/// How a single invocation ended
#[derive(Debug, PartialEq)]
pub enum Invocation<T> {
    /// Operation returned a value
    Completed(T),

    /// Deadline expired; the operation future was dropped
    TimedOut(Duration),

    /// Operation returned an error
    Failed(ItemError),
}

/// Run `operation` for `item` under `timeout`
pub async fn invoke<P, O>(operation: &O, item: Arc<Item<P>>, timeout: Duration) -> Invocation<O::Output>
where
    P: Send + Sync + 'static,
    O: Operation<P> + ?Sized,
{
    match tokio::time::timeout(timeout, operation.call(item)).await {
        Ok(Ok(value)) => Invocation::Completed(value),
        Ok(Err(ItemError::Timeout(after))) => Invocation::TimedOut(after),
        Ok(Err(e)) => Invocation::Failed(e),
        Err(_) => Invocation::TimedOut(timeout),
    }
}
