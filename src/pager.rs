//! Pager (component E) and the menu-shrink algorithm.

/// Splits `lines` into pages of at most `max_text` bytes. A page starts
/// with `title` (repeated on every page) when given. Pages are numbered
/// `(i/N) ` only when there is more than one.
pub fn paginate(lines: &[String], title: Option<&str>, max_text: usize) -> Vec<String> {
    const NUMBERING_RESERVE: usize = 8; // "(99/99) " — generous for realistic page counts

    let budget = max_text.saturating_sub(NUMBERING_RESERVE).max(1);

    fn joined_len(parts: &[String]) -> usize {
        if parts.is_empty() {
            0
        } else {
            parts.iter().map(|s| s.len()).sum::<usize>() + parts.len() - 1
        }
    }

    let mut pages: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    if let Some(t) = title {
        current.push(t.to_string());
    }

    for line in lines {
        let mut trial = current.clone();
        trial.push(line.clone());
        let only_title = title.is_some() && current.len() == 1;
        if joined_len(&trial) > budget && !current.is_empty() && !only_title {
            pages.push(std::mem::take(&mut current));
            if let Some(t) = title {
                current.push(t.to_string());
            }
        }
        current.push(line.clone());
    }
    if !current.is_empty() {
        pages.push(current);
    }

    let n = pages.len();
    pages
        .into_iter()
        .enumerate()
        .map(|(i, page_lines)| {
            let body = page_lines.join("\n");
            if n > 1 {
                format!("({}/{}) {}", i + 1, n, body)
            } else {
                body
            }
        })
        .collect()
}

/// Removal order for the menu-shrink algorithm, least essential first.
/// Part of the wire/behavioral contract — deployments rely on this exact
/// order so the shrunk menu is predictable.
const REMOVAL_ORDER: &[&str] = &[
    "dm", "whois", "nodes", "whoami", "status", "info", "reply", "p", "r <id>",
];

fn item_label(item: &str) -> &str {
    match item {
        "p" => "p <text>",
        other => other,
    }
}

/// Builds the `?`/`menu` reply, shrinking it to fit `max_text` by dropping
/// items in `REMOVAL_ORDER`, then falling back to a fixed minimal wording,
/// then to an absolute minimal fallback if even that doesn't fit.
pub fn build_menu(name: &str, max_text: usize) -> String {
    let mut present: Vec<&str> = vec!["r"];
    present.extend(REMOVAL_ORDER.iter().rev().copied());
    present.push("??");

    let render = |items: &[&str]| -> String {
        let rendered: Vec<&str> = items.iter().map(|i| item_label(i)).collect();
        format!("[{name}] {}", rendered.join(" | "))
    };

    let mut candidate = render(&present);
    if candidate.len() <= max_text {
        return candidate;
    }

    for remove in REMOVAL_ORDER {
        present.retain(|i| i != remove);
        candidate = render(&present);
        if candidate.len() <= max_text {
            return candidate;
        }
    }

    let fallback = format!("[{name}] r list | p | r <id> | ??");
    if fallback.len() <= max_text {
        return fallback;
    }

    "[BBS] r|p|r#|??".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paginate_reconstructs_input_and_respects_budget() {
        let lines: Vec<String> = (0..20).map(|i| format!("line number {i}")).collect();
        let pages = paginate(&lines, None, 40);
        assert!(pages.iter().all(|p| p.len() <= 40));

        let mut reconstructed = Vec::new();
        for page in &pages {
            let body = if pages.len() > 1 {
                page.splitn(2, ' ').nth(1).unwrap()
            } else {
                page.as_str()
            };
            reconstructed.extend(body.split('\n').map(|s| s.to_string()));
        }
        assert_eq!(reconstructed, lines);
    }

    #[test]
    fn paginate_repeats_title_on_every_page() {
        let lines: Vec<String> = (0..10).map(|i| format!("post #{i}")).collect();
        let pages = paginate(&lines, Some("[Notice 12:00]"), 30);
        assert!(pages.len() > 1);
        for page in &pages {
            assert!(page.contains("[Notice 12:00]"));
        }
    }

    #[test]
    fn single_page_has_no_numbering_prefix() {
        let lines = vec!["only one line".to_string()];
        let pages = paginate(&lines, None, 140);
        assert_eq!(pages, vec!["only one line".to_string()]);
    }

    #[test]
    fn menu_shrink_respects_generous_budget() {
        for max_text in [15usize, 20, 30, 60, 140] {
            let menu = build_menu("BBS", max_text);
            assert!(menu.len() <= max_text, "menu {menu:?} exceeds {max_text}");
        }
    }

    #[test]
    fn menu_shrink_uses_absolute_fallback_at_12() {
        let menu = build_menu("MeshLink BBS", 12);
        assert_eq!(menu, "[BBS] r|p|r#|??");
    }

    #[test]
    fn menu_shrink_drops_least_essential_first() {
        let menu = build_menu("VeryLongBbsDisplayName", 60);
        assert!(!menu.contains("dm"));
    }
}
