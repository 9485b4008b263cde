//! # Record store
//!
//! The bookmark data model, the [`DataStore`] seam with its in-memory and
//! PostgREST-backed implementations, and the [`RecordCache`] that mirrors one
//! owner's records locally.
mod backend;
mod cache;
mod error;
mod memory;
mod model;
mod query;
mod rest;

#[doc(inline)]
pub use backend::DataStore;

#[doc(inline)]
pub use cache::RecordCache;

#[doc(inline)]
pub use error::{StoreError, StoreErrorCode, StoreResult};

#[doc(inline)]
pub use memory::{InMemoryDataStore, StoreCallCounts};

#[doc(inline)]
pub use model::{
    Bookmark, BookmarkField, BookmarkId, NewBookmark, ValidationError, COLUMN_CREATED_AT,
    COLUMN_ID, COLUMN_TITLE, COLUMN_URL, COLUMN_USER_ID,
};

#[doc(inline)]
pub use query::{Filter, OrderBy, SelectQuery, SortDirection};

#[doc(inline)]
pub use rest::RestDataStore;

#[allow(unused_imports)]
pub(crate) use error::{internal_error, invalid_argument, permission_denied, unavailable};
