//! Typed collection queries and live subscriptions.
//!
//! A [`LiveQuery`] delivers the full query result once on subscription and
//! again after every commit that touches the queried collection. Each
//! snapshot is complete, so a consumer that falls behind loses nothing but
//! intermediate states.

use std::cmp::Ordering;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{CollectionPath, DocumentStore, Result};
use crate::model::Entity;

/// Snapshots buffered per subscription before the listener waits.
const SNAPSHOT_BUFFER: usize = 16;

type Filter<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
type Comparator<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Filter, order and limit over one collection.
pub struct Query<T> {
    collection: CollectionPath,
    filter: Option<Filter<T>>,
    order: Option<Comparator<T>>,
    limit: Option<usize>,
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            collection: self.collection.clone(),
            filter: self.filter.clone(),
            order: self.order.clone(),
            limit: self.limit,
        }
    }
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("collection", &self.collection)
            .field("filtered", &self.filter.is_some())
            .field("ordered", &self.order.is_some())
            .field("limit", &self.limit)
            .finish()
    }
}

impl<T: Entity> Query<T> {
    pub fn new(collection: CollectionPath) -> Self {
        Self {
            collection,
            filter: None,
            order: None,
            limit: None,
        }
    }

    pub fn collection(&self) -> &CollectionPath {
        &self.collection
    }

    pub fn filter(mut self, f: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(f));
        self
    }

    /// Sort results. Without an order, results come back in id order.
    pub fn order_by(mut self, f: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static) -> Self {
        self.order = Some(Arc::new(f));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Run once against the current store contents.
    pub async fn fetch(&self, store: &dyn DocumentStore) -> Result<Vec<T>> {
        let docs = store.list(&self.collection).await?;
        let mut items = Vec::with_capacity(docs.len());
        for doc in &docs {
            let item: T = doc.decode()?;
            if self.filter.as_ref().map_or(true, |f| f(&item)) {
                items.push(item);
            }
        }
        if let Some(order) = &self.order {
            items.sort_by(|a, b| order(a, b));
        }
        if let Some(limit) = self.limit {
            items.truncate(limit);
        }
        Ok(items)
    }

    /// Start a live subscription.
    pub fn subscribe(self, store: Arc<dyn DocumentStore>) -> LiveQuery<T> {
        LiveQuery::spawn(store, self)
    }
}

/// Handle to a running subscription.
///
/// Yields `Ok(snapshot)` for each refresh and `Err` when a refresh read
/// fails; the subscription keeps running after an error. Dropping the
/// handle or calling [`LiveQuery::close`] stops the listener.
pub struct LiveQuery<T> {
    receiver: mpsc::Receiver<Result<Vec<T>>>,
    task: JoinHandle<()>,
}

impl<T: Entity> LiveQuery<T> {
    fn spawn(store: Arc<dyn DocumentStore>, query: Query<T>) -> Self {
        // Subscribe before the first read so no commit falls between them.
        let mut changes = store.changes();
        let (sender, receiver) = mpsc::channel(SNAPSHOT_BUFFER);

        let task = tokio::spawn(async move {
            if !deliver(store.as_ref(), &query, &sender).await {
                return;
            }

            loop {
                match changes.recv().await {
                    Ok(notice) => {
                        if notice.collection != query.collection {
                            continue;
                        }
                        debug!(
                            collection = %query.collection,
                            version = notice.version,
                            "Refreshing live query"
                        );
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Missed notices may include ours; re-read to catch up.
                        warn!(collection = %query.collection, skipped = n, "Live query lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(collection = %query.collection, "Store closed, ending live query");
                        break;
                    }
                }

                if !deliver(store.as_ref(), &query, &sender).await {
                    break;
                }
            }
        });

        Self { receiver, task }
    }

    /// Wait for the next snapshot. `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<Result<Vec<T>>> {
        self.receiver.recv().await
    }

    /// Stop listening. No further snapshots are delivered.
    pub fn close(self) {}
}

impl<T> Unpin for LiveQuery<T> {}

impl<T> Stream for LiveQuery<T> {
    type Item = Result<Vec<T>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl<T> Drop for LiveQuery<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Send one fresh snapshot. Returns false once the handle is gone.
async fn deliver<T: Entity>(
    store: &dyn DocumentStore,
    query: &Query<T>,
    sender: &mpsc::Sender<Result<Vec<T>>>,
) -> bool {
    let snapshot = query.fetch(store).await;
    if let Err(e) = &snapshot {
        warn!(collection = %query.collection, error = %e, "Live query refresh failed");
    }
    sender.send(snapshot).await.is_ok()
}
