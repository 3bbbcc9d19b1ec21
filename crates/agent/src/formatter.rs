//! Response formatter: shapes a terminal reply into outbound payloads.
//!
//! Pure. Lengths are counted in `char`s so a multi-byte sequence is never
//! cut in half.

use tierbot_config::{OutboundConfig, OverflowPolicy};
use tierbot_core::channel::{OutboundMessage, PayloadKind};
use tierbot_core::conversation::ConversationId;

/// Sent instead of an empty reply.
pub const EMPTY_REPLY_FALLBACK: &str = "Sorry, I don't have an answer for that right now.";

const ELLIPSIS: char = '…';

#[derive(Debug, Clone)]
pub struct ResponseFormatter {
    max_chars: usize,
    overflow: OverflowPolicy,
}

impl Default for ResponseFormatter {
    fn default() -> Self {
        Self::new(4096, OverflowPolicy::Split)
    }
}

impl From<&OutboundConfig> for ResponseFormatter {
    fn from(config: &OutboundConfig) -> Self {
        Self::new(config.max_message_chars, config.overflow)
    }
}

impl ResponseFormatter {
    /// `max_chars` below 2 is raised to 2 so truncation can fit its marker.
    pub fn new(max_chars: usize, overflow: OverflowPolicy) -> Self {
        Self {
            max_chars: max_chars.max(2),
            overflow,
        }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Map a reply to one or more ordered outbound messages.
    pub fn format(
        &self,
        conversation_id: &ConversationId,
        recipient: &str,
        reply: &str,
    ) -> Vec<OutboundMessage> {
        let body = match reply.trim() {
            "" => EMPTY_REPLY_FALLBACK,
            trimmed => trimmed,
        };

        let parts = if body.chars().count() <= self.max_chars {
            vec![body.to_string()]
        } else {
            match self.overflow {
                OverflowPolicy::Truncate => vec![truncate(body, self.max_chars)],
                OverflowPolicy::Split => split(body, self.max_chars),
            }
        };

        let total_parts = parts.len();
        parts
            .into_iter()
            .enumerate()
            .map(|(i, text)| OutboundMessage {
                conversation_id: conversation_id.clone(),
                to: recipient.to_string(),
                kind: PayloadKind::Text,
                text,
                part: i + 1,
                total_parts,
            })
            .collect()
    }
}

/// Byte offset just past the first `n` chars of `s`.
fn byte_offset(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map_or(s.len(), |(i, _)| i)
}

fn truncate(body: &str, max_chars: usize) -> String {
    let keep = &body[..byte_offset(body, max_chars - 1)];
    let mut out = keep.trim_end().to_string();
    out.push(ELLIPSIS);
    out
}

/// Split at the last newline, else the last whitespace, that keeps each part
/// within `max_chars`. Hard-cuts words longer than a whole part.
fn split(body: &str, max_chars: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = body;

    while rest.chars().count() > max_chars {
        let limit = byte_offset(rest, max_chars);
        let window = &rest[..limit];

        let cut = if rest[limit..].starts_with(char::is_whitespace) {
            limit
        } else {
            window
                .rfind('\n')
                .filter(|&i| i > 0)
                .or_else(|| window.rfind(char::is_whitespace).filter(|&i| i > 0))
                .unwrap_or(limit)
        };

        let (head, tail) = rest.split_at(cut);
        parts.push(head.trim_end().to_string());
        rest = tail.trim_start();
    }

    if !rest.is_empty() {
        parts.push(rest.to_string());
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv() -> ConversationId {
        ConversationId::from("c1")
    }

    #[test]
    fn short_reply_is_single_message() {
        let out = ResponseFormatter::default().format(&conv(), "+15550001", "It's 4.");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "It's 4.");
        assert_eq!(out[0].to, "+15550001");
        assert_eq!(out[0].kind, PayloadKind::Text);
        assert_eq!((out[0].part, out[0].total_parts), (1, 1));
    }

    #[test]
    fn empty_reply_gets_fallback() {
        let out = ResponseFormatter::default().format(&conv(), "u", "   \n ");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, EMPTY_REPLY_FALLBACK);
    }

    #[test]
    fn split_prefers_whitespace_and_respects_limit() {
        let formatter = ResponseFormatter::new(20, OverflowPolicy::Split);
        let reply = "The quick brown fox jumps over the lazy dog and keeps running far away";
        let out = formatter.format(&conv(), "u", reply);

        assert!(out.len() > 1);
        for (i, msg) in out.iter().enumerate() {
            assert!(msg.text.chars().count() <= 20, "part too long: {:?}", msg.text);
            assert!(!msg.text.is_empty());
            assert_eq!(msg.part, i + 1);
            assert_eq!(msg.total_parts, out.len());
        }
        let rejoined: Vec<&str> = out.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(rejoined.join(" "), reply);
    }

    #[test]
    fn split_prefers_newlines() {
        let formatter = ResponseFormatter::new(16, OverflowPolicy::Split);
        let out = formatter.format(&conv(), "u", "first line\nsecond line here");
        assert_eq!(out[0].text, "first line");
        assert_eq!(out[1].text, "second line here");
    }

    #[test]
    fn split_hard_cuts_long_words() {
        let formatter = ResponseFormatter::new(4, OverflowPolicy::Split);
        let out = formatter.format(&conv(), "u", "abcdefghij");
        let texts: Vec<_> = out.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn multibyte_text_is_never_cut_mid_char() {
        let formatter = ResponseFormatter::new(5, OverflowPolicy::Split);
        let out = formatter.format(&conv(), "u", "héllo wörld ñandú");
        for msg in &out {
            assert!(msg.text.chars().count() <= 5);
        }
        let joined: String = out.iter().map(|m| m.text.as_str()).collect::<Vec<_>>().join(" ");
        assert_eq!(joined, "héllo wörld ñandú");
    }

    #[test]
    fn truncate_marks_the_cut() {
        let formatter = ResponseFormatter::new(10, OverflowPolicy::Truncate);
        let out = formatter.format(&conv(), "u", "ünïcödé text that is long");
        assert_eq!(out.len(), 1);
        assert!(out[0].text.ends_with('…'));
        assert!(out[0].text.chars().count() <= 10);
        assert!(out[0].text.starts_with("ünïcödé"));
    }

    #[test]
    fn from_config() {
        let config = OutboundConfig {
            max_message_chars: 1600,
            overflow: OverflowPolicy::Truncate,
        };
        let formatter = ResponseFormatter::from(&config);
        assert_eq!(formatter.max_chars(), 1600);
    }
}
