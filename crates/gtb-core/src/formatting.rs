//! Outbound reply formatting: parse-mode escaping and message chunking.

use regex::Regex;

use crate::config::ParseMode;

/// Telegram rejects messages over 4096 chars; stay under with headroom.
pub const TELEGRAM_SAFE_LIMIT: usize = 4000;

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Escape the MarkdownV2 special set so model output cannot break parsing.
pub fn escape_markdown_v2(text: &str) -> String {
    let special = Regex::new(r"([_*\[\]()~`>#+\-=|{}.!])").expect("valid regex");
    special.replace_all(text, r"\$1").to_string()
}

pub fn escape_for(mode: ParseMode, text: &str) -> String {
    match mode {
        ParseMode::Html => escape_html(text),
        ParseMode::MarkdownV2 => escape_markdown_v2(text),
    }
}

/// Split a reply into chunks that fit under `limit` characters.
///
/// Prefers line boundaries; a single line longer than the limit is hard-split
/// on char boundaries, keeping HTML entities and backslash escapes whole so
/// a chunk never ends mid-escape.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    for line in text.split('\n') {
        let line_chars = line.chars().count();

        if line_chars > limit {
            // Flush what we have, then hard-split the oversized line.
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_chars = 0;
            }
            let mut piece = String::new();
            let mut piece_chars = 0usize;
            for unit in escape_units(line) {
                let unit_chars = unit.chars().count();
                if piece_chars + unit_chars > limit && !piece.is_empty() {
                    chunks.push(std::mem::take(&mut piece));
                    piece_chars = 0;
                }
                piece.push_str(unit);
                piece_chars += unit_chars;
            }
            if !piece.is_empty() {
                current = piece;
                current_chars = piece_chars;
            }
            continue;
        }

        // +1 for the newline separator when the chunk already has content.
        let needed = line_chars + usize::from(!current.is_empty());
        if current_chars + needed > limit {
            chunks.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        if !current.is_empty() {
            current.push('\n');
            current_chars += 1;
        }
        current.push_str(line);
        current_chars += line_chars;
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Indivisible pieces of a line: a `&...;` entity or a backslash escape
/// stays whole, everything else is a single char. Splitting only between
/// units keeps escaped output parseable after chunking.
fn escape_units(line: &str) -> Vec<&str> {
    let mut units = Vec::new();
    let mut rest = line;
    while let Some(first) = rest.chars().next() {
        let mut end = first.len_utf8();
        if first == '\\' {
            if let Some(next) = rest[end..].chars().next() {
                end += next.len_utf8();
            }
        } else if first == '&' {
            let mut scanned = end;
            for ch in rest[end..].chars().take(8) {
                scanned += ch.len_utf8();
                if ch == ';' {
                    end = scanned;
                    break;
                }
            }
        }
        units.push(&rest[..end]);
        rest = &rest[end..];
    }
    units
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_escaping_covers_the_telegram_set() {
        assert_eq!(
            escape_html(r#"a < b & c > "d""#),
            "a &lt; b &amp; c &gt; &quot;d&quot;"
        );
    }

    #[test]
    fn markdown_v2_escaping_covers_the_special_set() {
        assert_eq!(escape_markdown_v2("a_b*c.d!"), r"a\_b\*c\.d\!");
        assert_eq!(escape_markdown_v2("plain words"), "plain words");
    }

    #[test]
    fn short_messages_pass_through_whole() {
        assert_eq!(split_message("hello", 10), vec!["hello"]);
    }

    #[test]
    fn long_messages_split_on_line_boundaries() {
        let text = "aaaa\nbbbb\ncccc";
        let chunks = split_message(text, 9);
        assert_eq!(chunks, vec!["aaaa\nbbbb", "cccc"]);
    }

    #[test]
    fn oversized_lines_are_hard_split() {
        let text = "x".repeat(25);
        let chunks = split_message(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn hard_split_respects_char_boundaries() {
        let text = "ж".repeat(12);
        let chunks = split_message(&text, 5);
        assert_eq!(chunks.concat(), text);
        assert!(chunks.iter().all(|c| c.chars().count() <= 5));
    }

    #[test]
    fn hard_split_keeps_html_entities_whole() {
        let text = format!("xxxx&amp;{}", "y".repeat(8));
        let chunks = split_message(&text, 6);
        assert_eq!(chunks.concat(), text);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 6);
            assert!(
                !chunk.contains('&') || chunk.contains("&amp;"),
                "entity cut in {chunk:?}"
            );
        }
    }

    #[test]
    fn hard_split_keeps_backslash_escapes_whole() {
        let text = r"\.".repeat(8);
        let chunks = split_message(&text, 5);
        assert_eq!(chunks.concat(), text);
        assert!(chunks.iter().all(|c| !c.ends_with('\\')));
    }

    #[test]
    fn bare_ampersands_still_split_normally() {
        let text = "&&&&&&&&&&";
        let chunks = split_message(text, 4);
        assert_eq!(chunks.concat(), text);
        assert!(chunks.iter().all(|c| c.chars().count() <= 4));
    }
}
