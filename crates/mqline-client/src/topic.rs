//! Topic filter matching for subscription streams.

/// Check if a topic matches a filter pattern.
///
/// Supports MQTT wildcards:
/// - `+` matches a single level
/// - `#` matches multiple levels (must be last)
pub(crate) fn topic_matches_filter(topic: &str, filter: &str) -> bool {
    // MQTT-4.7.2-1: Topics starting with $ are not matched by wildcards at root level
    if topic.starts_with('$') && (filter.starts_with('#') || filter.starts_with('+')) {
        return false;
    }

    let mut topic_levels = topic.split('/');
    let mut filter_levels = filter.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            // Multi-level wildcard matches everything from here, including the parent
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_matches_filter() {
        assert!(topic_matches_filter("a/b", "a/b"));
        assert!(!topic_matches_filter("a/b", "a/c"));
        assert!(topic_matches_filter("a/b", "a/+"));
        assert!(!topic_matches_filter("a/b/c", "a/+"));
        assert!(topic_matches_filter("a/b/c", "a/#"));
        assert!(topic_matches_filter("a", "a/#"));
        assert!(topic_matches_filter("a/b", "#"));
        assert!(topic_matches_filter("a//b", "a/+/b"));
        assert!(!topic_matches_filter("a/b", "a/b/c"));
    }

    #[test]
    fn test_dollar_topics() {
        assert!(!topic_matches_filter("$SYS/uptime", "#"));
        assert!(!topic_matches_filter("$SYS/uptime", "+/uptime"));
        assert!(topic_matches_filter("$SYS/uptime", "$SYS/#"));
    }
}
