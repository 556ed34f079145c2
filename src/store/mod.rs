//! Row-level access for the three entity tables. Every function takes the
//! connection it runs on, so callers decide what shares a transaction.

pub mod documents;
pub mod specializations;
pub mod users;

/// Trims submitted text; blank input counts as absent.
pub fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
