//! Reply-text extraction for inbound ticket email.
//!
//! Postmark's `StrippedTextReply` already removes quoted history when it can
//! detect it; when it is missing or empty we fall back to line-based
//! heuristics over the raw `TextBody`. The heuristics truncate at the first
//! quote marker, never at offset zero, so a message that opens with a quote
//! is kept whole rather than emptied.

/// Extract the customer's actual reply from an inbound email.
pub fn extract_reply_text(stripped_text_reply: Option<&str>, text_body: &str) -> String {
    if let Some(stripped) = stripped_text_reply {
        let stripped = stripped.trim();
        if !stripped.is_empty() {
            return stripped.to_string();
        }
    }
    strip_quoted_text(text_body)
}

/// Remove quoted history from a plain-text email body.
pub fn strip_quoted_text(text: &str) -> String {
    let text = text.trim();

    // Earliest byte offset at which quoted content starts
    let mut cut: Option<usize> = None;
    let mut offset = 0usize;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\n', '\r']).trim();
        if offset > 0 && is_quote_marker(trimmed, text, offset) {
            cut = Some(offset);
            break;
        }
        offset += line.len();
    }

    let kept = match cut {
        Some(index) => text[..index].trim(),
        None => text,
    };

    // Drop trailing lines that are only ">" characters
    let mut lines: Vec<&str> = kept.lines().collect();
    while let Some(last) = lines.last() {
        let t = last.trim();
        if !t.is_empty() && t.chars().all(|c| c == '>') {
            lines.pop();
        } else {
            break;
        }
    }
    lines.join("\n").trim().to_string()
}

fn is_quote_marker(line: &str, full_text: &str, line_offset: usize) -> bool {
    // Lines starting with ">" (quoted text)
    if line.starts_with('>') {
        return true;
    }

    // Gmail / Apple Mail attribution: "On Mon, Dec 16, 2025 ... John wrote:"
    let lower = line.to_lowercase();
    if lower.starts_with("on ") && lower.contains("wrote:") && line.len() <= 120 {
        return true;
    }

    // "--- Original Message ---"
    if lower.contains("original message") && line.starts_with("---") {
        return true;
    }

    // Horizontal separators
    if line.len() >= 5
        && (line.chars().all(|c| c == '_') || line.chars().all(|c| c == '*'))
    {
        return true;
    }

    // Outlook / generic forwarded-header block: "From: ..." directly followed
    // by a "Sent:" or "Date:" line
    if line.starts_with("From:") {
        let rest = &full_text[line_offset..];
        if let Some(next) = rest.lines().nth(1) {
            let next = next.trim_start();
            if next.starts_with("Sent:") || next.starts_with("Date:") {
                return true;
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_stripped_text_reply() {
        let out = extract_reply_text(Some("Thanks, that fixed it!"), "Thanks, that fixed it!\n\nOn Mon, Dec 16, 2025 John wrote:\n> original");
        assert_eq!(out, "Thanks, that fixed it!");
    }

    #[test]
    fn empty_stripped_reply_falls_back_to_body() {
        let out = extract_reply_text(Some("   "), "Hello there");
        assert_eq!(out, "Hello there");
    }

    #[test]
    fn strips_gmail_attribution() {
        let body = "Still broken after the update.\n\nOn Mon, Dec 16, 2025 at 10:30 AM Support <support@depositdesk.test> wrote:\n> Please update the plugin.";
        assert_eq!(strip_quoted_text(body), "Still broken after the update.");
    }

    #[test]
    fn strips_angle_quoted_lines() {
        let body = "New reply here\n> old message line one\n> old message line two";
        assert_eq!(strip_quoted_text(body), "New reply here");
    }

    #[test]
    fn strips_outlook_header_block() {
        let body = "Works now, thanks.\n\nFrom: Support\nSent: Monday, December 16, 2025\nTo: Customer\nSubject: Re: [Ticket #3] Checkout";
        assert_eq!(strip_quoted_text(body), "Works now, thanks.");
    }

    #[test]
    fn strips_original_message_separator() {
        let body = "Confirmed.\n----- Original Message -----\nold stuff";
        assert_eq!(strip_quoted_text(body), "Confirmed.");
    }

    #[test]
    fn keeps_message_that_opens_with_quote() {
        let body = "> you said this\nand I agree with it";
        assert_eq!(strip_quoted_text(body), body);
    }

    #[test]
    fn removes_trailing_quote_only_lines() {
        let body = "Final answer\n>\n>>\n> ";
        assert_eq!(strip_quoted_text(body), "Final answer");
    }
}
