//! Identifier sanitizing.
//!
//! Table and collection names arrive from the user; before they are written
//! into any query text they are reduced to a restricted charset.

/// Keeps only `[A-Za-z0-9_]`.
pub fn sanitize_table_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// Keeps only `[A-Za-z0-9_.-]` and trims dots from both ends.
///
/// Names in the server-reserved `system.` namespace reduce to the empty string.
pub fn sanitize_collection_name(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        .collect();
    let trimmed = kept.trim_matches('.');
    if trimmed.starts_with("system.") {
        String::new()
    } else {
        trimmed.to_string()
    }
}

/// True if `name` is non-empty and already survives [`sanitize_collection_name`].
pub fn is_collection_name(name: &str) -> bool {
    !name.is_empty() && sanitize_collection_name(name) == name
}

/// True if `name` is non-empty and made only of `[A-Za-z0-9_]`.
pub fn is_plain_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_injection_attempt() {
        assert_eq!(sanitize_table_name("users`; DROP TABLE x; --"), "usersDROPTABLEx");
        assert_eq!(sanitize_table_name("order_items"), "order_items");
        assert_eq!(sanitize_table_name("ünïcode"), "ncode");
    }

    #[test]
    fn test_collection_keeps_hyphen_and_dot() {
        assert_eq!(sanitize_collection_name("audit-log.2024"), "audit-log.2024");
        assert_eq!(sanitize_collection_name("$cmd"), "cmd");
        assert_eq!(sanitize_collection_name(".logs."), "logs");
        assert_eq!(sanitize_collection_name("system.users"), "");
    }

    #[test]
    fn test_is_collection_name() {
        assert!(is_collection_name("logs.2024"));
        assert!(is_collection_name("audit-log"));
        assert!(is_collection_name("systems"));
        assert!(!is_collection_name(""));
        assert!(!is_collection_name("$cmd"));
        assert!(!is_collection_name("system.profile"));
        assert!(!is_collection_name("a\"b"));
    }

    #[test]
    fn test_is_plain_identifier() {
        assert!(is_plain_identifier("users_2"));
        assert!(!is_plain_identifier(""));
        assert!(!is_plain_identifier("a-b"));
    }
}
