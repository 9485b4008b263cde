use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub const COLUMN_ID: &str = "id";
pub const COLUMN_TITLE: &str = "title";
pub const COLUMN_URL: &str = "url";
pub const COLUMN_USER_ID: &str = "user_id";
pub const COLUMN_CREATED_AT: &str = "created_at";

/// Store-assigned bookmark identifier.
///
/// Accepts both numeric and textual ids on the wire (identity columns and
/// uuids) and always serializes as text.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BookmarkId(String);

impl BookmarkId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BookmarkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BookmarkId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for BookmarkId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl<'de> Deserialize<'de> for BookmarkId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Signed(i64),
            Unsigned(u64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(value) => BookmarkId(value),
            RawId::Signed(value) => BookmarkId(value.to_string()),
            RawId::Unsigned(value) => BookmarkId(value.to_string()),
        })
    }
}

/// A stored bookmark. Never mutated in place; replaced by a refresh.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: BookmarkId,
    pub title: String,
    pub url: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl Bookmark {
    /// Textual value of a column, used for equality filters.
    pub fn column(&self, name: &str) -> Option<String> {
        match name {
            COLUMN_ID => Some(self.id.to_string()),
            COLUMN_TITLE => Some(self.title.clone()),
            COLUMN_URL => Some(self.url.clone()),
            COLUMN_USER_ID => Some(self.user_id.clone()),
            COLUMN_CREATED_AT => Some(self.created_at.to_rfc3339()),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BookmarkField {
    Title,
    Url,
}

impl BookmarkField {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookmarkField::Title => COLUMN_TITLE,
            BookmarkField::Url => COLUMN_URL,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    pub field: BookmarkField,
    message: String,
}

impl ValidationError {
    fn empty(field: BookmarkField) -> Self {
        Self {
            field,
            message: format!("{} must not be empty", field.as_str()),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Insert payload. Only constructible through [`NewBookmark::new`], which
/// rejects empty titles and urls.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NewBookmark {
    title: String,
    url: String,
    user_id: String,
}

impl NewBookmark {
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let title = title.into();
        let url = url.into();
        Self::validate(&title, &url)?;
        Ok(Self {
            title,
            url,
            user_id: user_id.into(),
        })
    }

    /// Checks the user-supplied fields without building a payload.
    ///
    /// Only empty strings are rejected; whitespace is passed through as typed.
    pub fn validate(title: &str, url: &str) -> Result<(), ValidationError> {
        if title.is_empty() {
            return Err(ValidationError::empty(BookmarkField::Title));
        }
        if url.is_empty() {
            return Err(ValidationError::empty(BookmarkField::Url));
        }
        Ok(())
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Materializes the stored record once the store has assigned id and timestamp.
    pub fn into_bookmark(self, id: BookmarkId, created_at: DateTime<Utc>) -> Bookmark {
        Bookmark {
            id,
            title: self.title,
            url: self.url,
            user_id: self.user_id,
            created_at,
        }
    }
}
