use std::cmp::Ordering;

use crate::store::model::{Bookmark, COLUMN_CREATED_AT, COLUMN_USER_ID};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Ascending => "asc",
            SortDirection::Descending => "desc",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub direction: SortDirection,
}

/// Column equality constraint (`column = value`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

/// Read request against one collection: equality filters plus an optional ordering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectQuery {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
}

impl SelectQuery {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: None,
        }
    }

    /// All records owned by `owner_id`, newest first.
    pub fn owned_by(collection: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self::new(collection)
            .filter_eq(COLUMN_USER_ID, owner_id)
            .order_by(COLUMN_CREATED_AT, SortDirection::Descending)
    }

    pub fn filter_eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push(Filter {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by = Some(OrderBy {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn matches(&self, bookmark: &Bookmark) -> bool {
        self.filters
            .iter()
            .all(|filter| bookmark.column(&filter.column).as_deref() == Some(filter.value.as_str()))
    }

    /// Applies the ordering locally. Ties fall back to the id so the result is
    /// deterministic regardless of the order rows arrived in.
    pub fn sort(&self, records: &mut [Bookmark]) {
        let Some(order) = &self.order_by else {
            return;
        };
        records.sort_by(|left, right| {
            let ordering = compare_column(left, right, &order.column)
                .then_with(|| left.id.cmp(&right.id));
            match order.direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            }
        });
    }
}

fn compare_column(left: &Bookmark, right: &Bookmark, column: &str) -> Ordering {
    if column == COLUMN_CREATED_AT {
        return left.created_at.cmp(&right.created_at);
    }
    left.column(column).cmp(&right.column(column))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::model::{BookmarkId, NewBookmark};
    use chrono::{TimeZone, Utc};

    fn bookmark(id: &str, owner: &str, second: u32) -> Bookmark {
        NewBookmark::new(format!("title-{id}"), format!("https://example.com/{id}"), owner)
            .unwrap()
            .into_bookmark(
                BookmarkId::new(id),
                Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, second).unwrap(),
            )
    }

    #[test]
    fn owner_query_filters_on_user_id() {
        let query = SelectQuery::owned_by("bookmarks", "user-1");
        assert!(query.matches(&bookmark("1", "user-1", 0)));
        assert!(!query.matches(&bookmark("2", "user-2", 0)));
    }

    #[test]
    fn owner_query_sorts_newest_first() {
        let query = SelectQuery::owned_by("bookmarks", "user-1");
        let mut records = vec![
            bookmark("1", "user-1", 1),
            bookmark("2", "user-1", 3),
            bookmark("3", "user-1", 2),
        ];
        query.sort(&mut records);
        let ids: Vec<&str> = records.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3", "1"]);
    }

    #[test]
    fn equal_timestamps_order_by_id() {
        let query = SelectQuery::owned_by("bookmarks", "user-1");
        let mut records = vec![bookmark("a", "user-1", 5), bookmark("b", "user-1", 5)];
        query.sort(&mut records);
        assert_eq!(records[0].id.as_str(), "b");
    }

    #[test]
    fn unordered_query_keeps_input_order() {
        let query = SelectQuery::new("bookmarks");
        let mut records = vec![bookmark("1", "user-1", 1), bookmark("2", "user-1", 3)];
        query.sort(&mut records);
        assert_eq!(records[0].id.as_str(), "1");
    }
}
