//! Commit-message conventions: issue references of the form `PREFIX-123`
//! and `#123`, with closing keywords (`closes`, `fixes`, `resolves` and
//! inflections). The parser only reports numbers; it never mutates any
//! tracker.

/// References extracted from one commit message.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MessageRefs {
    /// Issue numbers preceded by a closing keyword.
    pub closed: Vec<u64>,
    /// Issue numbers merely mentioned.
    pub referenced: Vec<u64>,
}

const CLOSING_KEYWORDS: &[&str] = &[
    "close", "closes", "closed", "fix", "fixes", "fixed", "resolve", "resolves", "resolved",
];

/// Scan a message for `PREFIX-<n>` and `#<n>` references. A reference
/// directly preceded by a closing keyword lands in `closed`; everything
/// else in `referenced`. Numbers are deduplicated in first-seen order and
/// a closed number never also appears as referenced.
pub fn parse_message_refs(message: &str) -> MessageRefs {
    let mut refs = MessageRefs::default();
    let mut previous_word: Option<String> = None;

    for token in message.split(|c: char| c.is_whitespace() || c == ',' || c == ';') {
        let trimmed = token.trim_matches(|c: char| {
            c == '.' || c == ':' || c == ')' || c == '(' || c == '!' || c == '?'
        });
        if trimmed.is_empty() {
            continue;
        }
        if let Some(number) = parse_reference(trimmed) {
            let closing = previous_word
                .as_deref()
                .is_some_and(|w| CLOSING_KEYWORDS.contains(&w));
            let bucket = if closing {
                &mut refs.closed
            } else {
                &mut refs.referenced
            };
            if !bucket.contains(&number) {
                bucket.push(number);
            }
        }
        previous_word = Some(trimmed.to_ascii_lowercase());
    }

    refs.referenced.retain(|n| !refs.closed.contains(n));
    refs
}

/// `#123` or `PREFIX-123` (alphabetic prefix, dash, digits) to its number.
fn parse_reference(token: &str) -> Option<u64> {
    if let Some(digits) = token.strip_prefix('#') {
        return digits.parse().ok();
    }
    let (prefix, digits) = token.rsplit_once('-')?;
    if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
