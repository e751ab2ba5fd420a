use std::iter::repeat;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};

pub fn find_first_subpath<P: AsRef<Path>, F: Fn(&Path) -> bool>(
    root: impl AsRef<Path>,
    subpaths: &[P],
    search: F,
) -> Option<PathBuf> {
    subpaths
        .iter()
        .zip(repeat(root.as_ref()))
        .map(|(b, a)| a.join(b))
        .find(|it: &PathBuf| search(it))
}

/// Fresh document id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Id derived from `key`; the same key always yields the same id.
pub fn stable_id(key: &str) -> String {
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

/// Current time truncated to whole milliseconds, the precision timestamps are stored with.
pub fn now() -> DateTime<Utc> {
    let now = Utc::now();
    Utc.timestamp_millis_opt(now.timestamp_millis())
        .single()
        .unwrap_or(now)
}

/// Trims every entry and drops the ones left empty.
pub fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|it| it.trim().to_string())
        .filter(|it| !it.is_empty())
        .collect()
}

pub fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_list_trims_and_drops_empty() {
        let cleaned = clean_list(vec![
            " rust ".to_string(),
            "".to_string(),
            "   ".to_string(),
            "sql".to_string(),
        ]);
        assert_eq!(cleaned, vec!["rust".to_string(), "sql".to_string()]);
    }

    #[test]
    fn now_has_millisecond_precision() {
        let now = now();
        assert_eq!(now.timestamp_subsec_nanos() % 1_000_000, 0);
    }
}
