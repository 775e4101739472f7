//! SWIFT MT style tagged-text parsing.
//!
//! A tag block starts at a line like `:59:` (optionally indented) and runs
//! until the next tag line, the `-}` end-of-message sentinel, or the end of
//! input. Envelope segments (`{1:...}`, `{2:...}`) are addressed separately
//! by [`envelope_blocks`].

use std::collections::HashMap;

use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

lazy_static! {
    static ref TAG_LINE: Regex = Regex::new(r"^\s*(:[0-9A-Za-z]{2,3}:)").unwrap();
    static ref ENVELOPE_SEGMENT: Regex = Regex::new(r"(?s)\{(\d+):(.*?)\}").unwrap();
}

/// Tag identifier (e.g. `:59:`) to the raw text of each occurrence, in
/// document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagBlockMap {
    blocks: IndexMap<String, Vec<String>>,
}

impl TagBlockMap {
    /// Parse tagged text into a block map.
    pub fn parse(content: &str) -> Self {
        let normalized = content.replace("\r\n", "\n").replace('\r', "\n");
        let mut blocks: IndexMap<String, Vec<String>> = IndexMap::new();
        let mut current: Option<(String, Vec<&str>)> = None;

        for line in normalized.split('\n') {
            if line.trim() == "-}" {
                break;
            }

            if let Some(marker) = TAG_LINE.captures(line).and_then(|caps| caps.get(1)) {
                if let Some((tag, lines)) = current.take() {
                    blocks.entry(tag).or_default().push(join_block(&lines));
                }
                let rest = &line[marker.end()..];
                // A whitespace-only remainder does not open the first line.
                let first = if !rest.trim().is_empty() || rest.is_empty() {
                    vec![rest]
                } else {
                    Vec::new()
                };
                current = Some((marker.as_str().to_string(), first));
            } else if let Some((_, lines)) = current.as_mut() {
                if !line.trim().is_empty() || (line.is_empty() && !lines.is_empty()) {
                    lines.push(line);
                }
            }
        }

        if let Some((tag, lines)) = current {
            blocks.entry(tag).or_default().push(join_block(&lines));
        }

        Self { blocks }
    }

    /// All occurrences of a tag. The tag may be given as `59` or `:59:`.
    pub fn get(&self, tag: &str) -> Option<&[String]> {
        self.blocks.get(&normalize_tag(tag)).map(Vec::as_slice)
    }

    /// First occurrence of a tag.
    pub fn first(&self, tag: &str) -> Option<&str> {
        self.get(tag).and_then(|values| values.first()).map(String::as_str)
    }

    /// Non-blank lines across every occurrence of a tag.
    pub fn lines(&self, tag: &str) -> Vec<String> {
        self.get(tag)
            .unwrap_or_default()
            .iter()
            .flat_map(|value| value.split('\n'))
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.blocks.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

fn join_block(lines: &[&str]) -> String {
    lines.join("\n").trim_end_matches('\n').to_string()
}

/// Normalise a rule path into a tag token: `20` and `:20:` both become `:20:`.
pub fn normalize_tag(path: &str) -> String {
    format!(":{}:", path.trim().trim_matches(':'))
}

/// Numbered envelope segments keyed by their stringified block number.
///
/// Each value is the trimmed text up to the first closing brace. A block
/// number seen twice keeps its last occurrence.
pub fn envelope_blocks(content: &str) -> HashMap<String, String> {
    ENVELOPE_SEGMENT
        .captures_iter(content)
        .map(|caps| (caps[1].to_string(), caps[2].trim().to_string()))
        .collect()
}

/// Flatten tagged text into `tag<T>` and `tag<T>Line<n>` string fields.
///
/// Keys drop the colons (`:50K:` becomes `tag50K`). When a tag repeats, the
/// last occurrence wins. Unlike [`TagBlockMap`], every continuation line is
/// kept, blank ones included, so `Line<n>` numbers follow the raw message.
/// Lines are stripped; `tag<T>` joins them with spaces.
pub fn flatten_tag_fields(content: &str) -> Map<String, Value> {
    let normalized = content.replace("\r\n", "\n").replace('\r', "\n");
    let mut blocks: IndexMap<&str, Vec<&str>> = IndexMap::new();
    let mut current: Option<(&str, Vec<&str>)> = None;

    for line in normalized.split('\n') {
        if line.trim() == "-}" {
            break;
        }
        if let Some(marker) = TAG_LINE.captures(line).and_then(|caps| caps.get(1)) {
            if let Some((tag, lines)) = current.take() {
                blocks.insert(tag, lines);
            }
            let rest = &line[marker.end()..];
            let first = if !rest.trim().is_empty() || rest.is_empty() {
                vec![rest]
            } else {
                Vec::new()
            };
            current = Some((marker.as_str().trim_matches(':'), first));
        } else if let Some((_, lines)) = current.as_mut() {
            lines.push(line);
        }
    }
    if let Some((tag, lines)) = current {
        blocks.insert(tag, lines);
    }

    let mut fields = Map::new();
    for (key, raw_lines) in blocks {
        let lines: Vec<&str> = raw_lines.iter().map(|l| l.trim()).collect();

        fields.insert(format!("tag{key}"), Value::String(lines.join(" ")));
        for (idx, line) in lines.iter().enumerate() {
            fields.insert(format!("tag{key}Line{}", idx + 1), Value::String(line.to_string()));
        }
    }

    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    const MT103: &str = concat!(
        "{1:F01BANKBEBBAXXX0000000000}{2:I103BANKDEFFXXXXN}{4:\r\n",
        ":20:REF123\r\n",
        ":23B:CRED\r\n",
        ":32A:240101USD1000,00\r\n",
        ":50K:/12345\r\n",
        "JOHN DOE\r\n",
        "  1 MAIN STREET\r\n",
        ":59:/98765\r\n",
        "ACME CORP\r\n",
        ":70:/INV/12345/NAME/Acme Corp\r\n",
        ":70:/RFB/XYZ\r\n",
        "-}",
    );

    #[test]
    fn test_parse_simple_tags() {
        let map = TagBlockMap::parse(":20:REF123\n:32A:240101USD1000,00\n-}");
        assert_eq!(map.first(":20:"), Some("REF123"));
        assert_eq!(map.first("32A"), Some("240101USD1000,00"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_continuation_lines_keep_leading_whitespace() {
        let map = TagBlockMap::parse(MT103);
        assert_eq!(map.first(":50K:"), Some("/12345\nJOHN DOE\n  1 MAIN STREET"));
    }

    #[test]
    fn test_repeated_tags_preserve_order() {
        let map = TagBlockMap::parse(MT103);
        let values = map.get(":70:").unwrap();
        assert_eq!(values, ["/INV/12345/NAME/Acme Corp", "/RFB/XYZ"]);
    }

    #[test]
    fn test_sentinel_stops_parsing() {
        let map = TagBlockMap::parse(":20:A\n-}\n:21:B\n");
        assert_eq!(map.first(":20:"), Some("A"));
        assert!(map.get(":21:").is_none());
    }

    #[test]
    fn test_lines_before_first_tag_are_discarded() {
        let map = TagBlockMap::parse("garbage\n{4:\n:20:A\n");
        assert_eq!(map.tags().collect::<Vec<_>>(), vec![":20:"]);
    }

    #[test]
    fn test_empty_tag_value_and_trailing_blanks() {
        let map = TagBlockMap::parse(":72:\nLINE1\n\n\n:20:X\n");
        assert_eq!(map.first(":72:"), Some("\nLINE1"));
        let map = TagBlockMap::parse(":72:   \nLINE1\n");
        assert_eq!(map.first(":72:"), Some("LINE1"));
    }

    #[test]
    fn test_reparse_is_idempotent() {
        assert_eq!(TagBlockMap::parse(MT103), TagBlockMap::parse(MT103));
    }

    #[test]
    fn test_lines_flatten_all_occurrences() {
        let map = TagBlockMap::parse(MT103);
        assert_eq!(map.lines(":70:"), vec!["/INV/12345/NAME/Acme Corp", "/RFB/XYZ"]);
        assert!(map.lines(":99:").is_empty());
    }

    #[test]
    fn test_envelope_blocks() {
        let blocks = envelope_blocks(MT103);
        assert_eq!(blocks.get("1").map(String::as_str), Some("F01BANKBEBBAXXX0000000000"));
        assert_eq!(blocks.get("2").map(String::as_str), Some("I103BANKDEFFXXXXN"));
        assert!(blocks.get("5").is_none());
    }

    #[test]
    fn test_normalize_tag() {
        assert_eq!(normalize_tag("20"), ":20:");
        assert_eq!(normalize_tag(":32A:"), ":32A:");
    }

    #[test]
    fn test_flatten_tag_fields() {
        let fields = flatten_tag_fields(MT103);
        assert_eq!(fields["tag20"], "REF123");
        assert_eq!(fields["tag50K"], "/12345 JOHN DOE 1 MAIN STREET");
        assert_eq!(fields["tag50KLine3"], "1 MAIN STREET");
        // last occurrence wins
        assert_eq!(fields["tag70"], "/RFB/XYZ");
        assert!(fields.get("tag70Line2").is_none());
    }

    #[test]
    fn test_flatten_keeps_blank_continuation_lines() {
        let fields = flatten_tag_fields(":72:   \nLINE1\n\nLINE3\n\n:20:X\n-}");
        assert_eq!(fields["tag72Line1"], "LINE1");
        assert_eq!(fields["tag72Line2"], "");
        assert_eq!(fields["tag72Line3"], "LINE3");
        assert_eq!(fields["tag72Line4"], "");
        assert_eq!(fields["tag72"], "LINE1  LINE3 ");
        assert_eq!(fields["tag20"], "X");
    }
}
