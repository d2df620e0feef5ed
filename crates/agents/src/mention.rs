//! `@Name` mention extraction.

use std::sync::LazyLock;

use regex::Regex;

use crate::registry::AgentRegistry;

static MENTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"@(\w+)").unwrap());

/// Raw `@token` names in order of appearance.
pub fn mention_tokens(text: &str) -> impl Iterator<Item = &str> {
    MENTION_PATTERN
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Agent keys mentioned in `text`, ordered by first occurrence, each at most once.
///
/// Tokens are matched case-insensitively against display names; unknown
/// tokens and the router are ignored.
pub fn extract_mentions(text: &str, registry: &AgentRegistry) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for token in mention_tokens(text) {
        if let Some(profile) = registry.find_by_name(token)
            && !keys.iter().any(|k| k == &profile.key)
        {
            keys.push(profile.key.clone());
        }
    }
    keys
}

/// Whether `name` is mentioned anywhere in `text`.
pub fn mentions_name(text: &str, name: &str) -> bool {
    let name = name.to_lowercase();
    mention_tokens(text).any(|token| token.to_lowercase() == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use roundtable_common::{AgentKind, AgentProfile};

    fn registry() -> AgentRegistry {
        AgentRegistry::builtin()
    }

    #[test]
    fn single_mention() {
        assert_eq!(
            extract_mentions("@Marc is C# obsolete?", &registry()),
            vec!["architect"]
        );
    }

    #[test]
    fn order_follows_first_occurrence_and_dedupes() {
        let keys = extract_mentions(
            "@nina can you check what @Claire said, and @NINA again, then @marc",
            &registry(),
        );
        assert_eq!(keys, vec!["reviewer", "strategy", "architect"]);
    }

    #[test]
    fn unknown_tokens_and_router_are_ignored() {
        assert!(extract_mentions("@Bob @router hello", &registry()).is_empty());
        assert!(extract_mentions("no mentions here", &registry()).is_empty());
        assert!(extract_mentions("", &registry()).is_empty());
    }

    #[test]
    fn email_like_text_still_tokenizes_after_at() {
        // `@` followed by word chars counts wherever it appears
        assert_eq!(
            extract_mentions("mail hugo@Hugo.example", &registry()),
            vec!["builder"]
        );
    }

    #[test]
    fn deterministic() {
        let text = "@Sophie and @Hugo, thoughts?";
        assert_eq!(extract_mentions(text, &registry()), extract_mentions(text, &registry()));
    }

    #[test]
    fn mentions_name_is_case_insensitive() {
        assert!(mentions_name("hey @claire", "Claire"));
        assert!(!mentions_name("hey claire", "Claire"));
        assert!(!mentions_name("hey @Claireon", "Claire"));
    }

    #[test]
    fn non_ascii_names_match_in_any_case() {
        let registry = AgentRegistry::new(vec![
            AgentProfile::new("helper", "Ada", "Helper", AgentKind::Generalist),
            AgentProfile::new("design", "Élodie", "Designer", AgentKind::Specialist),
        ])
        .unwrap();

        assert_eq!(extract_mentions("@élodie hi", &registry), vec!["design"]);
        assert_eq!(extract_mentions("@ÉLODIE and @Élodie", &registry), vec!["design"]);
        assert!(mentions_name("ping @ÉLODIE", "Élodie"));
        assert!(mentions_name("ping @élodie", "Élodie"));
    }
}
