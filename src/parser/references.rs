//! Thread reference chain from `References` and `In-Reply-To`.

/// Derive the ordered ancestor Message-IDs of a message, oldest first.
///
/// `references` is the whitespace-separated `References` header value and
/// `in_reply_to` the `In-Reply-To` value. The parent is appended when the
/// list is empty or does not already end with it. An empty parent is
/// appended as an empty entry, so a message with neither header yields
/// `[""]`. Enclosing `<` and `>` are stripped from every element; no
/// de-duplication is performed.
pub fn resolve_references(references: &str, in_reply_to: &str) -> Vec<String> {
    let in_reply_to = in_reply_to.trim();
    let mut chain: Vec<&str> = references.split_whitespace().collect();

    if chain.last() != Some(&in_reply_to) {
        chain.push(in_reply_to);
    }

    chain.into_iter().map(strip_angle_brackets).collect()
}

fn strip_angle_brackets(id: &str) -> String {
    let id = id.strip_prefix('<').unwrap_or(id);
    id.strip_suffix('>').unwrap_or(id).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_already_last() {
        assert_eq!(resolve_references("<a> <b>", "<b>"), vec!["a", "b"]);
    }

    #[test]
    fn test_only_in_reply_to() {
        assert_eq!(resolve_references("", "<x>"), vec!["x"]);
    }

    #[test]
    fn test_parent_appended() {
        assert_eq!(resolve_references("<a>", "<z>"), vec!["a", "z"]);
    }

    #[test]
    fn test_neither_header_yields_empty_entry() {
        assert_eq!(resolve_references("", ""), vec![""]);
    }

    #[test]
    fn test_folded_references() {
        let refs = "<one@x>\r\n <two@x>\t<three@x>";
        assert_eq!(
            resolve_references(refs, "<three@x>"),
            vec!["one@x", "two@x", "three@x"]
        );
    }

    #[test]
    fn test_no_dedup_of_repeated_ids() {
        assert_eq!(
            resolve_references("<a> <b> <a>", "<c>"),
            vec!["a", "b", "a", "c"]
        );
    }

    #[test]
    fn test_missing_parent_with_references() {
        // Parent absent but references present: the empty parent is still appended.
        assert_eq!(resolve_references("<a>", ""), vec!["a", ""]);
    }

    #[test]
    fn test_brackets_stripped_independently() {
        assert_eq!(resolve_references("a> <b", "<c"), vec!["a", "b", "c"]);
    }
}
