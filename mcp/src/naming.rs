//! Reversible exposed-key naming for aggregated tools.
//!
//! Tools surfaced to the caller are named `sanitize(server_id + "_" + name)`.
//! Sanitization is lossy (many raw server ids collapse to the same key), so
//! the unsanitized server id is carried as a `[server_id]` prefix on the
//! tool description and treated as the source of truth during resolution;
//! the key itself is just a lookup handle.

/// Lowercase a raw name and replace every character outside `[a-z0-9_-]`
/// with an underscore.
pub fn sanitize_tool_name(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Derive the caller-facing key for a backend tool.
pub fn exposed_key(server_id: &str, tool_name: &str) -> String {
    sanitize_tool_name(&format!("{}_{}", server_id, tool_name))
}

/// Prefix a tool description with its owning server id.
pub fn prefixed_description(server_id: &str, description: &str) -> String {
    format!("[{}] {}", server_id, description)
}

/// A resolved exposed key: the owning server and the tool's original name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedToolName {
    pub server_id: String,
    pub original_name: String,
}

/// Reverse an exposed key using its stored description.
///
/// Extracts the `[server_id]` prefix from the description, re-derives the
/// expected sanitized key prefix, and strips it. Returns `None` when the
/// description lacks the bracket prefix or the key does not match it.
pub fn parse_tool_name(exposed: &str, description: &str) -> Option<ParsedToolName> {
    let server_id = bracket_prefix(description)?;
    let expected_prefix = format!("{}_", sanitize_tool_name(server_id));
    let original_name = exposed.strip_prefix(&expected_prefix)?;
    if original_name.is_empty() {
        return None;
    }
    Some(ParsedToolName {
        server_id: server_id.to_string(),
        original_name: original_name.to_string(),
    })
}

/// Extract the leading `[server_id]` from a description, if present.
fn bracket_prefix(description: &str) -> Option<&str> {
    let rest = description.strip_prefix('[')?;
    let end = rest.find(']')?;
    if end == 0 {
        return None;
    }
    Some(&rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_passthrough() {
        assert_eq!(sanitize_tool_name("find_symbol"), "find_symbol");
        assert_eq!(sanitize_tool_name("get-metrics"), "get-metrics");
    }

    #[test]
    fn test_sanitize_complex_name() {
        assert_eq!(
            sanitize_tool_name("My.Complex/Tool@Name"),
            "my_complex_tool_name"
        );
    }

    #[test]
    fn test_exposed_key() {
        assert_eq!(exposed_key("serena", "find_symbol"), "serena_find_symbol");
        assert_eq!(
            exposed_key("datadog-eu", "get_metrics"),
            "datadog-eu_get_metrics"
        );
        assert_eq!(exposed_key("My.Server", "Do It"), "my_server_do_it");
    }

    #[test]
    fn test_parse_tool_name_round_trip() {
        let parsed = parse_tool_name("serena_find_symbol", "[serena] Find symbols in code")
            .expect("should parse");
        assert_eq!(parsed.server_id, "serena");
        assert_eq!(parsed.original_name, "find_symbol");
    }

    #[test]
    fn test_parse_tool_name_prefix_mismatch() {
        assert!(parse_tool_name("other_find_symbol", "[serena] Find symbols in code").is_none());
    }

    #[test]
    fn test_parse_tool_name_missing_bracket() {
        assert!(parse_tool_name("serena_find_symbol", "Find symbols in code").is_none());
        assert!(parse_tool_name("serena_find_symbol", "[] empty prefix").is_none());
    }

    #[test]
    fn test_parse_tool_name_empty_remainder() {
        assert!(parse_tool_name("serena_", "[serena] something").is_none());
    }

    #[test]
    fn test_round_trip_with_lossy_server_id() {
        // "[My.Server]" sanitizes to "my_server"; the description, not the key,
        // recovers the raw id.
        let key = exposed_key("My.Server", "list_items");
        assert_eq!(key, "my_server_list_items");

        let description = prefixed_description("My.Server", "Lists items");
        let parsed = parse_tool_name(&key, &description).expect("should parse");
        assert_eq!(parsed.server_id, "My.Server");
        assert_eq!(parsed.original_name, "list_items");
    }

    #[test]
    fn test_round_trip_ascii_safe_ids() {
        for (server, name) in [
            ("github", "search_code"),
            ("datadog-us", "get_metrics"),
            ("fs", "read-file"),
        ] {
            let key = exposed_key(server, name);
            let description = prefixed_description(server, "d");
            let parsed = parse_tool_name(&key, &description).unwrap();
            assert_eq!(parsed.server_id, server);
            assert_eq!(parsed.original_name, name);
        }
    }
}
