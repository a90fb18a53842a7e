//! Topic-exchange routing key matching.
//!
//! Keys and patterns are dot-separated words. In a pattern `*` matches
//! exactly one word and `#` matches zero or more words.

pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches_words(&pattern, &key)
}

fn matches_words(pattern: &[&str], key: &[&str]) -> bool {
    match (pattern.split_first(), key.split_first()) {
        (None, None) => true,
        (Some((&"#", rest)), _) => {
            matches_words(rest, key) || (!key.is_empty() && matches_words(pattern, &key[1..]))
        }
        (Some((&"*", rest)), Some((_, key_rest))) => matches_words(rest, key_rest),
        (Some((word, rest)), Some((k, key_rest))) => word == k && matches_words(rest, key_rest),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_match() {
        assert!(topic_matches("mod.deleted", "mod.deleted"));
        assert!(!topic_matches("mod.deleted", "mod.updated"));
        assert!(!topic_matches("mod.deleted", "mod.deleted.extra"));
    }

    #[test]
    fn test_star_matches_one_word() {
        assert!(topic_matches("file.*", "file.scanned"));
        assert!(!topic_matches("file.*", "file"));
        assert!(!topic_matches("file.*", "file.a.b"));
    }

    #[test]
    fn test_hash_matches_any_suffix() {
        assert!(topic_matches("user.#", "user"));
        assert!(topic_matches("user.#", "user.data-export.requested"));
        assert!(topic_matches("#", "anything.at.all"));
        assert!(topic_matches("#.requested", "user.data-export.requested"));
        assert!(!topic_matches("mod.#", "user.deleted"));
    }
}
