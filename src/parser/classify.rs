//! Body content classification.
//!
//! Two policies live here: splitting an HTML body into the newly written
//! part and the quoted conversation below it, and collapsing several inline
//! parts into one plain rendition.

use crate::model::message::Alternative;

/// Content type reported when merged inline parts disagree on their type.
pub const MIXED_CONTENT_TYPE: &str = "mixed";

/// Result of probing one quoting marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarkerMatch {
    /// The marker does not occur; try the next one.
    Absent,
    /// Split the body at this byte offset.
    SplitAt(usize),
    /// The marker occurs but the body must be kept whole.
    KeepWhole,
}

/// A structural marker one mail client family places in front of quoted history.
struct QuoteMarker {
    client: &'static str,
    find: fn(&str) -> MarkerMatch,
}

/// Probed in order, first match wins. Append new clients at the end.
static QUOTE_MARKERS: &[QuoteMarker] = &[
    QuoteMarker {
        client: "outlook",
        find: find_outlook,
    },
    QuoteMarker {
        client: "gmail",
        find: find_gmail,
    },
    QuoteMarker {
        client: "roundcube",
        find: find_roundcube,
    },
];

const OUTLOOK_REPLY_BLOCK: &str = r#"<div id="divRplyFwdMsg""#;
const OUTLOOK_SEPARATOR: &str = r#"<hr style="display:inline-block;width:98%""#;
const GMAIL_QUOTE: &str = r#"<div class="gmail_quote"#;
const ROUNDCUBE_REPLY_INTRO: &str = r#"<p id="reply-intro">"#;

/// Split an HTML body into `(primary_content, quoted_thread)`.
///
/// The quoted part is empty when no known marker is found. Concatenating
/// the two halves always gives back the input.
pub fn split_quoted_html(html: &str) -> (String, String) {
    for marker in QUOTE_MARKERS {
        match (marker.find)(html) {
            MarkerMatch::Absent => continue,
            MarkerMatch::SplitAt(at) => {
                tracing::trace!(client = marker.client, offset = at, "Split quoted HTML");
                let (primary, quoted) = html.split_at(at);
                return (primary.to_string(), quoted.to_string());
            }
            MarkerMatch::KeepWhole => {
                tracing::trace!(client = marker.client, "Quote marker found, not splitting");
                break;
            }
        }
    }
    (html.to_string(), String::new())
}

/// Outlook reply/forward header block, pulling in the `<hr>` drawn above it.
fn find_outlook(html: &str) -> MarkerMatch {
    let Some(block) = html.find(OUTLOOK_REPLY_BLOCK) else {
        return MarkerMatch::Absent;
    };
    match html[..block].rfind(OUTLOOK_SEPARATOR) {
        Some(separator) => MarkerMatch::SplitAt(separator),
        None => MarkerMatch::SplitAt(block),
    }
}

fn find_gmail(html: &str) -> MarkerMatch {
    html.find(GMAIL_QUOTE)
        .map_or(MarkerMatch::Absent, MarkerMatch::SplitAt)
}

/// Roundcube's "On ..., ... wrote:" paragraph. When nothing visible comes
/// before it the reply was bottom-posted and cannot be separated.
fn find_roundcube(html: &str) -> MarkerMatch {
    let Some(intro) = html.find(ROUNDCUBE_REPLY_INTRO) else {
        return MarkerMatch::Absent;
    };
    if visible_text(&html[..intro]).is_empty() {
        MarkerMatch::KeepWhole
    } else {
        MarkerMatch::SplitAt(intro)
    }
}

/// Text a reader would see: tags, `<head>`, scripts and styles removed,
/// non-breaking spaces folded, surrounding whitespace trimmed.
pub fn visible_text(html: &str) -> String {
    let mut text = html.to_string();
    for tag in ["head", "script", "style"] {
        text = remove_tag_block(&text, tag);
    }

    let mut result = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }

    result
        .replace("&nbsp;", " ")
        .replace("&#160;", " ")
        .replace('\u{a0}', " ")
        .trim()
        .to_string()
}

/// Remove an entire tag block (e.g. `<style>…</style>`), case-insensitively.
fn remove_tag_block(html: &str, tag: &str) -> String {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut result = String::with_capacity(html.len());
    let mut remaining = html;

    // ASCII lowering keeps byte offsets aligned with `remaining`.
    while let Some(start) = find_open_tag(&remaining.to_ascii_lowercase(), &open) {
        result.push_str(&remaining[..start]);
        let after = &remaining[start..];
        match after.to_ascii_lowercase().find(&close) {
            Some(end) => remaining = &after[end + close.len()..],
            None => {
                remaining = "";
                break;
            }
        }
    }
    result.push_str(remaining);
    result
}

/// Position of `open` (e.g. `<head`) that really starts that tag, so
/// `<head` does not match `<header>`.
fn find_open_tag(lowered: &str, open: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(found) = lowered[from..].find(open) {
        let start = from + found;
        let next = lowered[start + open.len()..].chars().next();
        if matches!(next, None | Some('>' | '/')) || next.is_some_and(char::is_whitespace) {
            return Some(start);
        }
        from = start + open.len();
    }
    None
}

/// Merge inline parts into one rendition.
///
/// Texts are concatenated in order. The first part's content type is kept
/// unless a later part declares a different one, in which case the result
/// is typed [`MIXED_CONTENT_TYPE`]. Returns `None` for no parts.
pub fn merge_alternatives(alternatives: &[Alternative]) -> Option<Alternative> {
    let first = alternatives.first()?;
    let mut content_type = first.content_type.clone();
    let mut text = String::new();

    for alternative in alternatives {
        if !alternative.content_type.eq_ignore_ascii_case(&content_type)
            && content_type != MIXED_CONTENT_TYPE
        {
            content_type = MIXED_CONTENT_TYPE.to_string();
        }
        text.push_str(&alternative.text);
    }

    Some(Alternative::new(content_type, text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_marker() {
        assert_eq!(
            split_quoted_html("<p>hello</p>"),
            ("<p>hello</p>".to_string(), String::new())
        );
    }

    #[test]
    fn test_empty_body() {
        assert_eq!(split_quoted_html(""), (String::new(), String::new()));
    }

    #[test]
    fn test_outlook_block() {
        let html = r#"<p>Sounds good</p><div id="divRplyFwdMsg" dir="ltr"><b>From:</b> Bob</div><p>old</p>"#;
        let (primary, quoted) = split_quoted_html(html);
        assert_eq!(primary, "<p>Sounds good</p>");
        assert!(quoted.starts_with(r#"<div id="divRplyFwdMsg""#));
        assert_eq!(format!("{primary}{quoted}"), html);
    }

    #[test]
    fn test_outlook_separator_goes_with_quote() {
        let html = concat!(
            "<p>New</p>",
            r#"<hr style="display:inline-block;width:98%" tabindex="-1">"#,
            r#"<div id="divRplyFwdMsg" dir="ltr">From: Alice</div>"#,
            "<p>Old</p>"
        );
        let (primary, quoted) = split_quoted_html(html);
        assert_eq!(primary, "<p>New</p>");
        assert!(quoted.starts_with("<hr"));
        assert!(quoted.contains("divRplyFwdMsg"));
        assert_eq!(format!("{primary}{quoted}"), html);
    }

    #[test]
    fn test_outlook_separator_after_block_is_ignored() {
        let html = concat!(
            "<p>New</p>",
            r#"<div id="divRplyFwdMsg">From: Alice</div>"#,
            r#"<hr style="display:inline-block;width:98%">"#,
        );
        let (primary, _) = split_quoted_html(html);
        assert_eq!(primary, "<p>New</p>");
    }

    #[test]
    fn test_gmail_quote() {
        let html = r#"<div dir="ltr">Thanks!</div><br><div class="gmail_quote"><div class="gmail_attr">On Mon, A wrote:</div><blockquote>hi</blockquote></div>"#;
        let (primary, quoted) = split_quoted_html(html);
        assert_eq!(primary, r#"<div dir="ltr">Thanks!</div><br>"#);
        assert!(quoted.starts_with(r#"<div class="gmail_quote">"#));
        assert_eq!(format!("{primary}{quoted}"), html);
    }

    #[test]
    fn test_gmail_quote_container_class() {
        let html = r#"<div>Yes</div><div class="gmail_quote gmail_quote_container">q</div>"#;
        let (primary, quoted) = split_quoted_html(html);
        assert_eq!(primary, "<div>Yes</div>");
        assert_eq!(quoted, r#"<div class="gmail_quote gmail_quote_container">q</div>"#);
    }

    #[test]
    fn test_outlook_wins_over_gmail() {
        let html = r#"<p>a</p><div class="gmail_quote">g</div><div id="divRplyFwdMsg">o</div>"#;
        let (primary, _) = split_quoted_html(html);
        assert!(primary.contains("gmail_quote"));
    }

    #[test]
    fn test_roundcube_top_posting() {
        let html = r#"<html><body><p>My answer</p><p id="reply-intro">On 2024-01-01, Bob wrote:</p><blockquote type="cite">question</blockquote></body></html>"#;
        let (primary, quoted) = split_quoted_html(html);
        assert_eq!(primary, "<html><body><p>My answer</p>");
        assert!(quoted.starts_with(r#"<p id="reply-intro">"#));
        assert_eq!(format!("{primary}{quoted}"), html);
    }

    #[test]
    fn test_roundcube_bottom_posting_not_split() {
        let html = r#"<html><head><style>p { color: red }</style></head><body>&nbsp;<p id="reply-intro">On 2024-01-01, Bob wrote:</p><blockquote>question</blockquote><p>My answer below</p></body></html>"#;
        assert_eq!(split_quoted_html(html), (html.to_string(), String::new()));
    }

    #[test]
    fn test_visible_text_strips_markup() {
        let html = "<HEAD><TITLE>t</TITLE></HEAD><div> <b>Hi</b>&nbsp;</div><script>x()</script>";
        assert_eq!(visible_text(html), "Hi");
    }

    #[test]
    fn test_visible_text_keeps_header_element() {
        assert_eq!(visible_text("<header>Top</header>"), "Top");
    }

    #[test]
    fn test_visible_text_unclosed_block() {
        assert_eq!(visible_text("before<style>p{}"), "before");
    }

    #[test]
    fn test_merge_same_type() {
        let merged = merge_alternatives(&[
            Alternative::new("text/plain", "Hello "),
            Alternative::new("text/plain", "world"),
        ])
        .unwrap();
        assert_eq!(merged.content_type, "text/plain");
        assert_eq!(merged.text, "Hello world");
    }

    #[test]
    fn test_merge_mixed_types() {
        let merged = merge_alternatives(&[
            Alternative::new("text/plain", "a"),
            Alternative::new("text/html", "<b>b</b>"),
            Alternative::new("text/plain", "c"),
        ])
        .unwrap();
        assert_eq!(merged.content_type, MIXED_CONTENT_TYPE);
        assert_eq!(merged.text, "a<b>b</b>c");
    }

    #[test]
    fn test_merge_nothing() {
        assert!(merge_alternatives(&[]).is_none());
    }
}
