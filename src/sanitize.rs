//! Filename sanitization for received manifest entries.
//!
//! Peers may run any OS, so the same (strictest) invalid set applies
//! everywhere and received names are deterministic across platforms.

use anyhow::{bail, Result};
use std::path::PathBuf;

/// Characters never allowed in a single path segment.
const INVALID: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

fn invalid_char(c: char) -> bool {
    c.is_ascii_control() || INVALID.contains(&c)
}

/// Replace every invalid character in one path segment with `_`.
pub fn sanitize_segment(name: &str) -> String {
    name.chars()
        .map(|c| if invalid_char(c) { '_' } else { c })
        .collect()
}

/// Sanitize a slash-separated relative path from a Folder manifest,
/// segment by segment. Parent-directory components are rejected so a
/// manifest can never write outside the destination root.
pub fn sanitize_relative_path(rel: &str) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for seg in rel.split(['/', '\\']) {
        match seg {
            "" | "." => continue,
            ".." => bail!("relative path {:?} contains parent component", rel),
            s => out.push(sanitize_segment(s)),
        }
    }
    if out.as_os_str().is_empty() {
        bail!("relative path {:?} has no usable segments", rel);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_invalid_chars() {
        assert_eq!(sanitize_segment("a:b*c.txt"), "a_b_c.txt");
        assert_eq!(sanitize_segment("plain.txt"), "plain.txt");
        assert_eq!(sanitize_segment("que?ry\"<x>|"), "que_ry__x__");
        assert_eq!(sanitize_segment("tab\there"), "tab_here");
    }

    #[test]
    fn relative_path_segments_sanitized_independently() {
        let p = sanitize_relative_path("src/a:b/c.go").unwrap();
        assert_eq!(p, PathBuf::from("src").join("a_b").join("c.go"));
    }

    #[test]
    fn backslash_separators_accepted() {
        let p = sanitize_relative_path("docs\\intro.md").unwrap();
        assert_eq!(p, PathBuf::from("docs").join("intro.md"));
    }

    #[test]
    fn parent_components_rejected() {
        assert!(sanitize_relative_path("../escape.txt").is_err());
        assert!(sanitize_relative_path("ok/../../etc/passwd").is_err());
    }

    #[test]
    fn empty_path_rejected() {
        assert!(sanitize_relative_path("").is_err());
        assert!(sanitize_relative_path("././").is_err());
    }
}
