use crate::TextVerdict;

/// Paralinguistic tags understood by the fast expressive variant.
pub const PARALINGUISTIC_TAGS: &[&str] = &["laugh", "chuckle", "cough", "sigh", "gasp", "yawn"];

/// How an engine treats bracket-delimited `[tag]` tokens in its input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagPolicy {
    /// The engine does not inspect its text.
    Unchecked,
    /// Any tag makes the text invalid.
    Rejected,
    /// Only the listed tags are accepted.
    Allowed(Vec<String>),
}

impl TagPolicy {
    /// Policy accepting exactly `tags`.
    pub fn allowed(tags: &[&str]) -> Self {
        TagPolicy::Allowed(tags.iter().map(|t| t.to_string()).collect())
    }

    pub fn allows(&self, tag: &str) -> bool {
        match self {
            TagPolicy::Allowed(tags) => tags.iter().any(|t| t == tag),
            _ => false,
        }
    }

    pub fn allowed_tags(&self) -> &[String] {
        match self {
            TagPolicy::Allowed(tags) => tags,
            _ => &[],
        }
    }

    /// Check every `[tag]` in `text` against the policy.
    ///
    /// `None` for [`TagPolicy::Unchecked`]. Otherwise blank text is invalid, and
    /// so is any tag the policy does not allow.
    pub fn validate(&self, text: &str) -> Option<TextVerdict> {
        let allowed = match self {
            TagPolicy::Unchecked => return None,
            TagPolicy::Rejected => None,
            TagPolicy::Allowed(tags) => Some(tags),
        };

        if text.trim().is_empty() {
            return Some(TextVerdict::invalid("Text cannot be empty"));
        }

        let found = scan_tags(text);
        if found.is_empty() {
            return Some(TextVerdict::ok());
        }

        let Some(allowed) = allowed else {
            return Some(TextVerdict::invalid(format!(
                "Paralinguistic tags {found:?} are only supported by the fast expressive variant. \
                 Switch to expressive-fast or remove the tags."
            )));
        };

        let unknown: Vec<&str> = found
            .into_iter()
            .filter(|t| !allowed.iter().any(|a| a == t))
            .collect();
        if unknown.is_empty() {
            Some(TextVerdict::ok())
        } else {
            Some(TextVerdict::invalid(format!(
                "Unknown tags: {unknown:?}. Supported: {allowed:?}"
            )))
        }
    }
}

/// Find every `[word]` token, in order of appearance.
///
/// A word is one or more alphanumeric characters or underscores. Brackets
/// around anything else (spaces, punctuation, nothing) are left alone.
pub fn scan_tags(text: &str) -> Vec<&str> {
    let mut tags = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        let word_len = after
            .char_indices()
            .find(|(_, c)| !is_word_char(*c))
            .map(|(i, _)| i)
            .unwrap_or(after.len());

        if word_len > 0 && after[word_len..].starts_with(']') {
            tags.push(&after[..word_len]);
            rest = &after[word_len + 1..];
        } else {
            rest = after;
        }
    }

    tags
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_tags_in_order() {
        assert_eq!(
            scan_tags("hi [laugh] there [sigh_2]!"),
            vec!["laugh", "sigh_2"]
        );
    }

    #[test]
    fn ignores_non_word_brackets() {
        assert!(scan_tags("a [] b [two words] c [x-y] [unclosed").is_empty());
    }

    #[test]
    fn nested_open_bracket_restarts_the_scan() {
        assert_eq!(scan_tags("[[cough]]"), vec!["cough"]);
    }

    #[test]
    fn plain_text_is_valid_for_every_checking_policy() {
        for policy in [TagPolicy::Rejected, TagPolicy::allowed(PARALINGUISTIC_TAGS)] {
            assert_eq!(policy.validate("plain text"), Some(TextVerdict::ok()));
        }
    }

    #[test]
    fn unchecked_policy_has_no_verdict() {
        assert_eq!(TagPolicy::Unchecked.validate("hi [anything]"), None);
    }

    #[test]
    fn known_tag_needs_tag_support() {
        let fast = TagPolicy::allowed(PARALINGUISTIC_TAGS);
        assert!(fast.validate("hi [laugh]").unwrap().valid);

        let verdict = TagPolicy::Rejected.validate("hi [laugh]").unwrap();
        assert!(!verdict.valid);
        assert!(verdict.message.contains("laugh"));
    }

    #[test]
    fn unknown_tag_is_enumerated() {
        let verdict = TagPolicy::allowed(PARALINGUISTIC_TAGS)
            .validate("hi [foo] [laugh] [bar]")
            .unwrap();
        assert!(!verdict.valid);
        assert!(verdict.message.starts_with(r#"Unknown tags: ["foo", "bar"]"#));
    }

    #[test]
    fn blank_text_is_invalid() {
        assert!(!TagPolicy::Rejected.validate("   ").unwrap().valid);
    }
}
