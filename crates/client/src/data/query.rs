//! Collection query builder.

use url::form_urlencoded::byte_serialize;

/// Filter comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    Is,
}

impl FilterOp {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Like => "like",
            Self::Is => "is",
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

/// A query against a named collection.
///
/// ```rust,ignore
/// let recent = Query::new("check_ins")
///     .eq("user_id", user.id)
///     .order("created_at", Order::Desc)
///     .limit(20);
/// assert_eq!(
///     recent.path(),
///     "rest/v1/check_ins?select=*&user_id=eq.…&order=created_at.desc&limit=20"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    collection: String,
    columns: String,
    filters: Vec<(String, FilterOp, String)>,
    order: Vec<(String, Order)>,
    limit: Option<usize>,
}

impl Query {
    /// Select every column of `collection`.
    #[must_use]
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            columns: "*".to_string(),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
        }
    }

    /// Restrict the selected columns (comma separated, embedded resources
    /// allowed).
    #[must_use]
    pub fn select(mut self, columns: impl Into<String>) -> Self {
        self.columns = columns.into();
        self
    }

    /// Add a filter.
    #[must_use]
    pub fn filter(mut self, column: impl Into<String>, op: FilterOp, value: impl ToString) -> Self {
        self.filters.push((column.into(), op, value.to_string()));
        self
    }

    /// Shorthand for an equality filter.
    #[must_use]
    pub fn eq(self, column: impl Into<String>, value: impl ToString) -> Self {
        self.filter(column, FilterOp::Eq, value)
    }

    /// Add a sort key; earlier keys take precedence.
    #[must_use]
    pub fn order(mut self, column: impl Into<String>, direction: Order) -> Self {
        self.order.push((column.into(), direction));
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    #[must_use]
    pub fn has_filters(&self) -> bool {
        !self.filters.is_empty()
    }

    /// Prefix shared by every read path of this query's collection.
    #[must_use]
    pub fn collection_prefix(&self) -> String {
        collection_prefix(&self.collection)
    }

    /// Resource path for reading.
    #[must_use]
    pub fn path(&self) -> String {
        let mut params = vec![format!("select={}", encode(&self.columns))];
        params.extend(self.filter_params());
        if !self.order.is_empty() {
            let order = self
                .order
                .iter()
                .map(|(column, direction)| {
                    let direction = match direction {
                        Order::Asc => "asc",
                        Order::Desc => "desc",
                    };
                    format!("{}.{direction}", encode(column))
                })
                .collect::<Vec<_>>()
                .join(",");
            params.push(format!("order={order}"));
        }
        if let Some(limit) = self.limit {
            params.push(format!("limit={limit}"));
        }
        format!("{}{}", self.collection_prefix(), params.join("&"))
    }

    /// Resource path for updates and deletes: filters only.
    #[must_use]
    pub fn mutation_path(&self) -> String {
        format!(
            "{}{}",
            self.collection_prefix(),
            self.filter_params().collect::<Vec<_>>().join("&")
        )
    }

    fn filter_params(&self) -> impl Iterator<Item = String> + '_ {
        self.filters
            .iter()
            .map(|(column, op, value)| {
                format!("{}={}.{}", encode(column), op.as_str(), encode(value))
            })
    }
}

/// `rest/v1/{collection}?`
pub(crate) fn collection_prefix(collection: &str) -> String {
    format!("rest/v1/{}?", encode(collection))
}

fn encode(value: &str) -> String {
    byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_all() {
        assert_eq!(Query::new("courses").path(), "rest/v1/courses?select=*");
    }

    #[test]
    fn test_full_query() {
        let query = Query::new("check_ins")
            .select("id,course_id,created_at")
            .eq("user_id", "42")
            .filter("rating", FilterOp::Gte, 4)
            .order("created_at", Order::Desc)
            .order("id", Order::Asc)
            .limit(20);

        assert_eq!(
            query.path(),
            "rest/v1/check_ins?select=id%2Ccourse_id%2Ccreated_at&user_id=eq.42&rating=gte.4\
             &order=created_at.desc,id.asc&limit=20"
        );
    }

    #[test]
    fn test_values_are_encoded() {
        let query = Query::new("courses").eq("name", "Pine Valley & Co");
        assert_eq!(
            query.mutation_path(),
            "rest/v1/courses?name=eq.Pine+Valley+%26+Co"
        );
    }

    #[test]
    fn test_prefix_does_not_cover_similar_collections() {
        let courses = Query::new("courses").path();
        let reviews = Query::new("courses_reviews").path();
        let prefix = Query::new("courses").collection_prefix();
        assert!(courses.starts_with(&prefix));
        assert!(!reviews.starts_with(&prefix));
    }
}
