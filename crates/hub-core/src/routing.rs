//! Namespacing helpers for backend-native names.
//!
//! Every tool and prompt a backend exposes is republished as
//! `<sanitized backend name>__<original name>`. These helpers centralise
//! the rewrite so every aggregate operation behaves identically.

/// Separator between the backend namespace and the original name
pub const NAME_SEPARATOR: &str = "__";

/// Map a display name onto the identifier alphabet `[A-Za-z0-9_-]`.
///
/// Characters outside the alphabet are dropped.
///
/// ```
/// # use hub_core::routing::sanitize_name;
/// assert_eq!(sanitize_name("My Server!"), "MyServer");
/// assert_eq!(sanitize_name("git-hub_2"), "git-hub_2");
/// ```
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// External name for a backend-native item.
///
/// ```
/// # use hub_core::routing::namespaced_name;
/// assert_eq!(namespaced_name("A", "echo"), "A__echo");
/// assert_eq!(namespaced_name("File System", "read"), "FileSystem__read");
/// ```
pub fn namespaced_name(backend_name: &str, original: &str) -> String {
    format!("{}{}{}", sanitize_name(backend_name), NAME_SEPARATOR, original)
}

/// Prefix a description (or resource display name) with its backend.
///
/// A missing description still gets the prefix so callers can tell
/// which backend an entry came from.
///
/// ```
/// # use hub_core::routing::prefixed_label;
/// assert_eq!(prefixed_label("A", Some("Echo text")), "[A] Echo text");
/// assert_eq!(prefixed_label("A", None), "[A] ");
/// ```
pub fn prefixed_label(backend_name: &str, label: Option<&str>) -> String {
    format!("[{}] {}", backend_name, label.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_drops_unsafe_characters() {
        assert_eq!(sanitize_name("weather.api/v2"), "weatherapiv2");
        assert_eq!(sanitize_name("über"), "ber");
        assert_eq!(sanitize_name(""), "");
    }

    #[test]
    fn namespacing_is_deterministic() {
        let first = namespaced_name("Git Hub", "create_issue");
        let second = namespaced_name("Git Hub", "create_issue");
        assert_eq!(first, second);
        assert_eq!(first, "GitHub__create_issue");
    }

    #[test]
    fn original_name_is_kept_verbatim() {
        // Only the namespace is sanitized; backends own their item names.
        assert_eq!(namespaced_name("A", "do.thing"), "A__do.thing");
    }
}
