/// Right-aligned `key: value` line for detail views.
pub fn kv(key: &str, value: &str) -> String {
    format!("{key:>14}: {value}")
}

pub fn header(title: &str) -> String {
    format!("=== {title} ===")
}

/// Semicolon-joined list, `-` when empty.
pub fn joined(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join("; ")
    }
}

pub fn or_dash(value: Option<&str>) -> &str {
    value.unwrap_or("-")
}
