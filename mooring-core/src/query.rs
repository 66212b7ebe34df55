use std::cmp::Ordering;

use crate::{Document, Value};

/// A comparison applied to a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    /// The field equals one of the values in an array operand.
    In,
    /// The field equals none of the values in an array operand.
    NotIn,
    /// The field is an array containing the operand.
    ArrayContains,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    /// Whether a document satisfies this filter. A missing field never matches.
    pub fn matches(&self, document: &Document) -> bool {
        let Some(field) = document.get(&self.field) else {
            return false;
        };

        let is_equal = |a: &Value, b: &Value| a.compare(b) == Some(Ordering::Equal);
        let ordering = field.compare(&self.value);

        match self.op {
            FilterOp::Equal => ordering == Some(Ordering::Equal),
            FilterOp::NotEqual => !matches!(field, Value::Null) && ordering != Some(Ordering::Equal),
            FilterOp::LessThan => ordering == Some(Ordering::Less),
            FilterOp::LessThanOrEqual => {
                matches!(ordering, Some(Ordering::Less) | Some(Ordering::Equal))
            }
            FilterOp::GreaterThan => ordering == Some(Ordering::Greater),
            FilterOp::GreaterThanOrEqual => {
                matches!(ordering, Some(Ordering::Greater) | Some(Ordering::Equal))
            }
            FilterOp::In => match &self.value {
                Value::Array(options) => options.iter().any(|o| is_equal(field, o)),
                _ => false,
            },
            FilterOp::NotIn => match &self.value {
                Value::Array(options) => {
                    !matches!(field, Value::Null) && !options.iter().any(|o| is_equal(field, o))
                }
                _ => false,
            },
            FilterOp::ArrayContains => match field {
                Value::Array(values) => values.iter().any(|v| is_equal(v, &self.value)),
                _ => false,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// A filtered, ordered and limited read of one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: vec![],
            order_by: None,
            limit: None,
        }
    }

    /// Adds a filter. All filters must match.
    pub fn filter(mut self, field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.filters.iter().all(|f| f.matches(document))
    }

    /// Evaluates the query against a set of documents.
    ///
    /// Ordering follows the document store: documents missing the order field are excluded,
    /// and ties are broken by document id.
    pub fn apply<'a, I>(&self, documents: I) -> Vec<Document>
    where
        I: IntoIterator<Item = &'a Document>,
    {
        let mut result: Vec<_> = documents
            .into_iter()
            .filter(|d| self.matches(d))
            .filter(|d| match &self.order_by {
                Some(order) => d.get(&order.field).is_some(),
                None => true,
            })
            .cloned()
            .collect();

        match &self.order_by {
            Some(order) => result.sort_by(|a, b| {
                let left = a.get(&order.field).unwrap_or(&Value::Null);
                let right = b.get(&order.field).unwrap_or(&Value::Null);

                let ordering = left.compare(right).unwrap_or(Ordering::Equal);
                let ordering = match order.direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                };

                ordering.then_with(|| a.id.cmp(&b.id))
            }),
            None => result.sort_by(|a, b| a.id.cmp(&b.id)),
        }

        if let Some(limit) = self.limit {
            result.truncate(limit);
        }

        result
    }
}

#[cfg(test)]
mod test {
    use crate::fields;

    use super::*;

    fn boats() -> Vec<Document> {
        vec![
            Document::new("a", fields! { "name" => "Orion", "length" => 12i64, "tags" => vec!["sail"] }),
            Document::new("b", fields! { "name" => "Vega", "length" => 9i64, "tags" => vec!["motor"] }),
            Document::new("c", fields! { "name" => "Altair", "length" => 12i64 }),
            Document::new("d", fields! { "name" => "Deneb" }),
        ]
    }

    fn ids(docs: Vec<Document>) -> Vec<String> {
        docs.into_iter().map(|d| d.id).collect()
    }

    #[test]
    fn filters_order_and_limit() {
        let docs = boats();

        let query = Query::collection("yachts")
            .filter("length", FilterOp::GreaterThanOrEqual, 10i64)
            .order_by("name", Direction::Ascending);
        assert_eq!(ids(query.apply(&docs)), vec!["c", "a"]);

        let query = Query::collection("yachts")
            .order_by("length", Direction::Descending)
            .limit(2);
        assert_eq!(ids(query.apply(&docs)), vec!["a", "c"]);

        let query = Query::collection("yachts").filter("tags", FilterOp::ArrayContains, "motor");
        assert_eq!(ids(query.apply(&docs)), vec!["b"]);
    }

    #[test]
    fn in_and_not_in_skip_missing_fields() {
        let docs = boats();

        let query = Query::collection("yachts").filter("length", FilterOp::In, vec![9i64, 12]);
        assert_eq!(ids(query.apply(&docs)), vec!["a", "b", "c"]);

        let query = Query::collection("yachts").filter("length", FilterOp::NotIn, vec![9i64]);
        assert_eq!(ids(query.apply(&docs)), vec!["a", "c"]);

        let query = Query::collection("yachts").filter("length", FilterOp::NotEqual, 12i64);
        assert_eq!(ids(query.apply(&docs)), vec!["b"]);
    }
}
