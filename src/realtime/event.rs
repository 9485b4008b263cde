use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::realtime::error::{protocol_error, RealtimeError};
use crate::store::{Bookmark, BookmarkId, COLUMN_USER_ID};

pub const DEFAULT_SCHEMA: &str = "public";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = RealtimeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "INSERT" => Ok(ChangeKind::Insert),
            "UPDATE" => Ok(ChangeKind::Update),
            "DELETE" => Ok(ChangeKind::Delete),
            other => Err(protocol_error(format!("unknown change type '{other}'"))),
        }
    }
}

/// Which change kinds a topic listens for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EventFilter {
    #[default]
    All,
    Only(ChangeKind),
}

impl EventFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventFilter::All => "*",
            EventFilter::Only(kind) => kind.as_str(),
        }
    }

    pub fn accepts(&self, kind: ChangeKind) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Only(expected) => *expected == kind,
        }
    }
}

/// What a subscription listens to: one table, optionally narrowed to one owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelTopic {
    pub schema: String,
    pub collection: String,
    pub events: EventFilter,
    pub owner_id: Option<String>,
}

impl ChannelTopic {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            schema: DEFAULT_SCHEMA.to_string(),
            collection: collection.into(),
            events: EventFilter::All,
            owner_id: None,
        }
    }

    /// Every change kind on `collection` for records owned by `owner_id`.
    pub fn owned_by(collection: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self::new(collection).with_owner(owner_id)
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_events(mut self, events: EventFilter) -> Self {
        self.events = events;
        self
    }

    /// Channel name on the realtime socket.
    pub fn name(&self) -> String {
        format!("realtime:{}", self.collection)
    }

    /// Server-side row filter, e.g. `user_id=eq.user-1`.
    pub fn row_filter(&self) -> Option<String> {
        self.owner_id
            .as_ref()
            .map(|owner| format!("{COLUMN_USER_ID}=eq.{owner}"))
    }

    /// Events without owner information (deletes whose old row is not
    /// replicated) are accepted; they only ever trigger a refresh.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.schema != self.schema || event.collection != self.collection {
            return false;
        }
        if !self.events.accepts(event.kind) {
            return false;
        }
        match (&self.owner_id, &event.owner_id) {
            (Some(expected), Some(actual)) => expected == actual,
            _ => true,
        }
    }
}

/// A change reported by the realtime service. Carries just enough to route
/// it; consumers re-read the store instead of applying it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub schema: String,
    pub collection: String,
    pub record_id: Option<BookmarkId>,
    pub owner_id: Option<String>,
    pub commit_timestamp: Option<DateTime<Utc>>,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, collection: impl Into<String>) -> Self {
        Self {
            kind,
            schema: DEFAULT_SCHEMA.to_string(),
            collection: collection.into(),
            record_id: None,
            owner_id: None,
            commit_timestamp: None,
        }
    }

    pub fn for_record(kind: ChangeKind, collection: impl Into<String>, record: &Bookmark) -> Self {
        Self {
            record_id: Some(record.id.clone()),
            owner_id: Some(record.user_id.clone()),
            commit_timestamp: Some(Utc::now()),
            ..Self::new(kind, collection)
        }
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }
}
