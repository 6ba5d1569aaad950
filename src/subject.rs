//! Subject pattern matching
//!
//! A subscription pattern is one of:
//! - `*` - matches every topic
//! - a literal - matches the identical topic only
//! - `<prefix>*` - matches any topic starting with `<prefix>`
//!
//! Wildcards anywhere but the end are treated as literal characters.

/// Universal wildcard pattern
pub const WILDCARD: &str = "*";

/// Check whether `pattern` matches the published `topic`
pub fn matches(pattern: &str, topic: &str) -> bool {
    if pattern == WILDCARD || pattern == topic {
        return true;
    }

    match pattern.strip_suffix('*') {
        Some(prefix) => topic.starts_with(prefix),
        None => false,
    }
}
