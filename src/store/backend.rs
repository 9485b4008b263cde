use async_trait::async_trait;

use crate::store::error::StoreResult;
use crate::store::model::{Bookmark, BookmarkId, NewBookmark};
use crate::store::query::SelectQuery;

/// Remote record store.
///
/// Implementations report unreachable or failing backends as
/// [`StoreErrorCode::Unavailable`](crate::store::StoreErrorCode::Unavailable).
#[async_trait]
pub trait DataStore: Send + Sync + 'static {
    async fn select(&self, query: &SelectQuery) -> StoreResult<Vec<Bookmark>>;

    /// Inserts a record and returns it with the store-assigned id and timestamp.
    async fn insert(&self, collection: &str, record: NewBookmark) -> StoreResult<Bookmark>;

    /// Deletes by id. Deleting an id that does not exist succeeds.
    async fn delete(&self, collection: &str, id: &BookmarkId) -> StoreResult<()>;
}
