//! Query-string style parameters.

use serde_json::Value;

use crate::error::ValidationError;

/// Parameter names with a fixed meaning; everything else is an equality filter.
pub const LIMIT_PARAM: &str = "limit";
/// See [`LIMIT_PARAM`].
pub const SORT_PARAM: &str = "sort";

/// Direction of the `_id` sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Lowest `_id` first.
    #[default]
    Ascending,
    /// Highest `_id` first.
    Descending,
}

impl SortOrder {
    /// `desc` in any case means descending; any other value ascending.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("desc") {
            Self::Descending
        } else {
            Self::Ascending
        }
    }
}

/// Equality filters, sort and limit for a query.
///
/// Values are strings, the way they arrive in a URL query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    filters: Vec<(String, String)>,
    sort: Option<SortOrder>,
    limit: Option<usize>,
}

impl QueryParams {
    /// No filtering, sorting or limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds parameters from `name=value` pairs.
    ///
    /// `limit` must be a non-negative integer; `sort` is `asc` or `desc`.
    /// Every other pair becomes an equality filter.
    ///
    /// # Errors
    /// `ValidationError` if `limit` is not a non-negative integer.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut params = Self::new();
        for (name, value) in pairs {
            let (name, value) = (name.into(), value.into());
            match name.as_str() {
                LIMIT_PARAM => params.limit = Some(parse_limit(&value)?),
                SORT_PARAM => params.sort = Some(SortOrder::parse(&value)),
                _ => params.filters.push((name, value)),
            }
        }
        Ok(params)
    }

    /// Adds an equality filter.
    #[must_use]
    pub fn with_filter(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    /// Sorts results by `_id`.
    #[must_use]
    pub const fn with_sort(mut self, order: SortOrder) -> Self {
        self.sort = Some(order);
        self
    }

    /// Keeps at most `limit` results.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Equality filters as `(field, expected)` pairs, in insertion order.
    #[must_use]
    pub fn filters(&self) -> &[(String, String)] {
        &self.filters
    }

    /// Requested sort direction; `None` keeps storage order.
    #[must_use]
    pub const fn sort(&self) -> Option<SortOrder> {
        self.sort
    }

    /// Maximum number of documents to return.
    #[must_use]
    pub const fn limit(&self) -> Option<usize> {
        self.limit
    }
}

fn parse_limit(value: &str) -> Result<usize, ValidationError> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| ValidationError::InvalidQueryParam {
            name: LIMIT_PARAM.to_string(),
            reason: format!("'{value}' is not a non-negative integer"),
        })
}

/// Renders a field value the way a JavaScript `toString()` would.
///
/// `null` yields `None` so it never equals a filter value.
#[must_use]
pub fn js_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => i.to_string(),
            (_, Some(u), _) => u.to_string(),
            (_, _, Some(f)) if f.fract() == 0.0 && f.abs() < 1e21 => format!("{f:.0}"),
            _ => n.to_string(),
        }),
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .map(|v| js_string(v).unwrap_or_default())
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Object(_) => Some("[object Object]".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_pairs() {
        let params =
            QueryParams::from_pairs([("limit", "2"), ("sort", "DESC"), ("year", "1970")]).unwrap();
        assert_eq!(params.limit(), Some(2));
        assert_eq!(params.sort(), Some(SortOrder::Descending));
        assert_eq!(params.filters(), &[("year".to_string(), "1970".to_string())]);
    }

    #[test]
    fn test_unknown_sort_is_ascending() {
        let params = QueryParams::from_pairs([("sort", "sideways")]).unwrap();
        assert_eq!(params.sort(), Some(SortOrder::Ascending));
    }

    #[test]
    fn test_bad_limit() {
        for bad in ["ten", "-1", "1.5", ""] {
            let err = QueryParams::from_pairs([("limit", bad)]).unwrap_err();
            assert!(matches!(err, ValidationError::InvalidQueryParam { .. }), "{bad}");
        }
    }

    #[test]
    fn test_js_string() {
        assert_eq!(js_string(&json!(null)), None);
        assert_eq!(js_string(&json!(true)).as_deref(), Some("true"));
        assert_eq!(js_string(&json!(1970)).as_deref(), Some("1970"));
        assert_eq!(js_string(&json!(1970.0)).as_deref(), Some("1970"));
        assert_eq!(js_string(&json!(2.5)).as_deref(), Some("2.5"));
        assert_eq!(js_string(&json!(["a", 1, null])).as_deref(), Some("a,1,"));
        assert_eq!(js_string(&json!({"a": 1})).as_deref(), Some("[object Object]"));
    }
}
