//! Opaque id-producing sub-queries
//!
//! An [`IdSelector`] is a SQL `SELECT` yielding a single integer column. It is
//! composed by callers (e.g. "flows touching these applications" or "ids of
//! currently active applications") and embedded by the repository inside an
//! `IN (...)` clause. Parameters are always bound, never spliced.

/// One piece of a selector: raw SQL text or a bound parameter
#[derive(Debug, Clone, PartialEq)]
pub enum SelectorFragment {
    Sql(String),
    Int(i64),
    Text(String),
}

/// A sub-query producing flow or entity ids
#[derive(Debug, Clone, PartialEq)]
pub struct IdSelector {
    fragments: Vec<SelectorFragment>,
}

impl IdSelector {
    /// Start a selector from raw SQL
    pub fn sql(sql: impl Into<String>) -> Self {
        Self {
            fragments: vec![SelectorFragment::Sql(sql.into())],
        }
    }

    /// Selector over a fixed id list
    pub fn ids<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = i64>,
    {
        let mut ids = ids.into_iter().peekable();
        if ids.peek().is_none() {
            return Self::sql("SELECT NULL WHERE 0");
        }

        let mut selector = Self::sql("VALUES ");
        let mut first = true;
        for id in ids {
            selector = selector.push_sql(if first { "(" } else { ", (" }).bind_int(id).push_sql(")");
            first = false;
        }
        selector
    }

    /// Append raw SQL
    pub fn push_sql(mut self, sql: impl Into<String>) -> Self {
        self.fragments.push(SelectorFragment::Sql(sql.into()));
        self
    }

    /// Append a bound integer parameter
    pub fn bind_int(mut self, value: i64) -> Self {
        self.fragments.push(SelectorFragment::Int(value));
        self
    }

    /// Append a bound text parameter
    pub fn bind_text(mut self, value: impl Into<String>) -> Self {
        self.fragments.push(SelectorFragment::Text(value.into()));
        self
    }

    pub fn fragments(&self) -> &[SelectorFragment] {
        &self.fragments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_selector_binds_each_value() {
        let selector = IdSelector::ids([1, 2]);
        let binds: Vec<_> = selector
            .fragments()
            .iter()
            .filter(|f| matches!(f, SelectorFragment::Int(_)))
            .collect();
        assert_eq!(binds, vec![&SelectorFragment::Int(1), &SelectorFragment::Int(2)]);
    }

    #[test]
    fn test_empty_ids_selector_yields_no_rows() {
        let selector = IdSelector::ids(Vec::<i64>::new());
        assert_eq!(
            selector.fragments(),
            &[SelectorFragment::Sql("SELECT NULL WHERE 0".to_string())]
        );
    }
}
