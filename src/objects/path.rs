//! Object names and hierarchy paths
//!
//! Objects are addressed like files: `/parent/child` from the top of the
//! tree, or `child/grandchild` relative to an object. `.` and `..` segments
//! are understood.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{CoreError, CoreResult};

/// Longest object name, in bytes
pub const MAX_NAME_LEN: usize = 63;

/// Name pattern: anything but the separator and NUL
static NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[^/\x00]+$").unwrap());

/// Check that `name` can name an object
pub fn validate_name(name: &str) -> CoreResult<()> {
    if name.len() > MAX_NAME_LEN || !NAME_REGEX.is_match(name) || name == "." || name == ".." {
        return Err(CoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// One step of a parsed path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStep<'a> {
    Parent,
    Child(&'a str),
}

/// Split a path into steps; the flag is true for absolute paths
pub fn split_path(path: &str) -> (bool, Vec<PathStep<'_>>) {
    let steps = path
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .map(|s| if s == ".." { PathStep::Parent } else { PathStep::Child(s) })
        .collect();
    (path.starts_with('/'), steps)
}

/// Join names, top first, into an absolute path
pub fn join_path<S: AsRef<str>>(names: &[S]) -> String {
    if names.is_empty() {
        return "/".to_string();
    }
    names.iter().fold(String::new(), |mut acc, n| {
        acc.push('/');
        acc.push_str(n.as_ref());
        acc
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("button-1").is_ok());
        assert!(validate_name("_3").is_ok());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN)).is_ok());
        for bad in ["", "a/b", "..", ".", "nul\0"] {
            assert!(validate_name(bad).is_err(), "{:?}", bad);
        }
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_split_and_join() {
        let (abs, steps) = split_path("/a//b/./../c");
        assert!(abs);
        assert_eq!(
            steps,
            vec![
                PathStep::Child("a"),
                PathStep::Child("b"),
                PathStep::Parent,
                PathStep::Child("c")
            ]
        );
        assert!(!split_path("x").0);
        assert_eq!(join_path(&["a", "b"]), "/a/b");
        assert_eq!(join_path::<&str>(&[]), "/");
    }
}
