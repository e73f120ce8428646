//! Node-address canonicalization.
//!
//! The radio's node directory and inbound packets expose sender identity in
//! a handful of shapes (bare 32-bit integer, hex string, `!`-prefixed hex
//! string). Every other component treats a NodeId as the single canonical
//! form `!hhhhhhhh` (8 lowercase hex digits), so this is the one place that
//! shape-switches.

use crate::transport::NodeKey;

/// Canonicalizes a 32-bit node number to `!hhhhhhhh`.
pub fn canon_from_int(n: u32) -> String {
    format!("!{:08x}", n)
}

/// Canonicalizes a heterogeneous directory/packet key.
pub fn canon_node_key(key: &NodeKey) -> String {
    match key {
        NodeKey::Int(n) => canon_from_int(*n),
        NodeKey::Hex(h) => canon_from_int(u32::from_str_radix(h, 16).unwrap_or(0)),
        NodeKey::Bang(s) => {
            if let Some(rest) = s.strip_prefix('!') {
                format!("!{}", rest.to_lowercase())
            } else {
                format!("!{}", s.to_lowercase())
            }
        }
    }
}

/// Canonicalizes an inbound packet's sender: prefer an explicit `!`-prefixed
/// `from_id` string; otherwise mask the integer `from` to 32 bits and
/// hex-format it with leading zeros.
pub fn canon_sender(from_id: Option<&str>, from: Option<u32>) -> Option<String> {
    if let Some(s) = from_id {
        if let Some(rest) = s.strip_prefix('!') {
            return Some(format!("!{}", rest.to_lowercase()));
        }
    }
    from.map(canon_from_int)
}

/// Parses a canonical NodeId back to its 32-bit integer form, if valid.
pub fn parse_canon(id: &str) -> Option<u32> {
    u32::from_str_radix(id.strip_prefix('!')?, 16).ok()
}

/// Finds the directory entry whose canonicalized key matches `id`.
pub fn find_entry_by_canon<'a>(
    nodes: &'a [(NodeKey, crate::transport::NodeEntry)],
    id: &str,
) -> Option<&'a crate::transport::NodeEntry> {
    nodes
        .iter()
        .find(|(key, _)| canon_node_key(key) == id)
        .map(|(_, entry)| entry)
}

/// Resolves a human ShortName to a canonical NodeId by case-insensitive scan
/// of the transport's node directory. Returns the first match.
pub fn resolve_short_name(nodes: &[(NodeKey, crate::transport::NodeEntry)], short: &str) -> Option<String> {
    nodes
        .iter()
        .find(|(_, entry)| {
            entry
                .short_name
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case(short))
        })
        .map(|(key, _)| canon_node_key(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canon_from_int_is_lower_hex8() {
        assert_eq!(canon_from_int(0xdeadbeef), "!deadbeef");
        assert_eq!(canon_from_int(0), "!00000000");
        assert_eq!(canon_from_int(1), "!00000001");
    }

    #[test]
    fn canon_sender_prefers_bang_string() {
        assert_eq!(canon_sender(Some("!AAbbCCdd"), Some(1)), Some("!aabbccdd".to_string()));
        assert_eq!(canon_sender(None, Some(0xdeadbeef)), Some("!deadbeef".to_string()));
        assert_eq!(canon_sender(None, None), None);
    }

    #[test]
    fn round_trip_through_parse_and_canon() {
        for n in [0u32, 1, 0xdeadbeef, u32::MAX] {
            let c = canon_from_int(n);
            let parsed = parse_canon(&c).unwrap();
            assert_eq!(canon_from_int(parsed), c);
        }
    }

    #[test]
    fn find_entry_by_canon_matches_int_key() {
        use crate::transport::{NodeEntry, NodeKey};
        let nodes = vec![(
            NodeKey::Int(0xdeadbeef),
            NodeEntry {
                short_name: Some("BOB".to_string()),
                long_name: Some("Bob's Node".to_string()),
            },
        )];
        let entry = find_entry_by_canon(&nodes, "!deadbeef").unwrap();
        assert_eq!(entry.short_name.as_deref(), Some("BOB"));
        assert!(find_entry_by_canon(&nodes, "!00000001").is_none());
    }

    #[test]
    fn resolve_short_name_is_case_insensitive() {
        use crate::transport::{NodeEntry, NodeKey};
        let nodes = vec![(
            NodeKey::Int(0xdeadbeef),
            NodeEntry {
                short_name: Some("BOB".to_string()),
                long_name: Some("Bob's Node".to_string()),
            },
        )];
        assert_eq!(resolve_short_name(&nodes, "bob"), Some("!deadbeef".to_string()));
        assert_eq!(resolve_short_name(&nodes, "carol"), None);
    }
}
