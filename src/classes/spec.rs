//! Class spec parsing
//!
//! A class spec names a position in the inheritance tree as colon-separated
//! segments, e.g. `HM_Widget:HM_Button`. Segments may be written with a
//! namespace shorthand, `Hemi(Widget:Button)`, which expands every segment
//! inside the group with the namespace prefix. An optional `@lib1,lib2`
//! suffix lists modules providing the class implementation.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Appended to the stripped short name to form a module's class symbol
pub const CLASS_SYMBOL_SUFFIX: &str = "Class";

/// Segment pattern: identifier characters only
static SEGMENT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// A namespace maps a short name to a class-name prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    /// Name used in shorthand specs (e.g. "Hemi")
    pub name: String,
    /// Prefix prepended to each segment (e.g. "HM_")
    pub prefix: String,
    /// Documentation URL
    pub url: String,
}

/// Growable namespace table
#[derive(Debug, Clone, Default)]
pub struct Namespaces {
    list: Vec<Namespace>,
}

impl Namespaces {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a namespace, replacing any existing one of the same name
    pub fn register(&mut self, name: &str, prefix: &str, url: &str) {
        let ns = Namespace {
            name: name.to_string(),
            prefix: prefix.to_string(),
            url: url.to_string(),
        };
        match self.list.iter_mut().find(|n| n.name == name) {
            Some(existing) => *existing = ns,
            None => self.list.push(ns),
        }
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.list.len();
        self.list.retain(|n| n.name != name);
        self.list.len() != before
    }

    pub fn get(&self, name: &str) -> Option<&Namespace> {
        self.list.iter().find(|n| n.name == name)
    }

    /// Namespace whose prefix starts `segment`, if any
    pub fn owner_of(&self, segment: &str) -> Option<&Namespace> {
        self.list
            .iter()
            .filter(|n| !n.prefix.is_empty() && segment.starts_with(&n.prefix))
            .max_by_key(|n| n.prefix.len())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Namespace> {
        self.list.iter()
    }
}

/// A fully expanded class spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSpec {
    /// Expanded segments, root-most first
    pub segments: Vec<String>,
    /// Modules listed after `@`
    pub libs: Vec<String>,
}

impl ClassSpec {
    /// Fully-qualified colon-separated name
    pub fn name(&self) -> String {
        self.segments.join(":")
    }

    /// Last segment of the name
    pub fn short_name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }

    /// Name of the immediate superclass, `None` when it is the root class
    pub fn parent_name(&self) -> Option<String> {
        if self.segments.len() <= 1 {
            None
        } else {
            Some(self.segments[..self.segments.len() - 1].join(":"))
        }
    }

    /// Symbol a class module exports for this class
    pub fn symbol(&self) -> String {
        class_symbol(self.short_name())
    }
}

/// Symbol name for a class short name: namespace punctuation removed, suffix added
///
/// ```
/// use hemirt::classes::class_symbol;
/// assert_eq!(class_symbol("HM_Button"), "HMButtonClass");
/// ```
pub fn class_symbol(short_name: &str) -> String {
    let mut sym: String = short_name.chars().filter(|c| *c != '_').collect();
    sym.push_str(CLASS_SYMBOL_SUFFIX);
    sym
}

/// Parse and expand a class spec
pub fn parse_class_spec(spec: &str, namespaces: &Namespaces) -> CoreResult<ClassSpec> {
    let malformed = |reason: &str| CoreError::MalformedSpec {
        spec: spec.to_string(),
        reason: reason.to_string(),
    };

    let (body, libs) = match spec.split_once('@') {
        Some((body, libs)) => {
            let libs: Vec<String> = libs
                .split(',')
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            if libs.is_empty() {
                return Err(malformed("empty module list after '@'"));
            }
            (body, libs)
        }
        None => (spec, Vec::new()),
    };

    let mut segments = Vec::new();
    let mut cur = String::new();
    let mut group: Option<String> = None;
    let mut after_group = false;

    let push = |segments: &mut Vec<String>, prefix: &str, seg: &str| -> CoreResult<()> {
        if seg.is_empty() {
            return Err(malformed("empty segment"));
        }
        let full = format!("{}{}", prefix, seg);
        if !SEGMENT_REGEX.is_match(&full) {
            return Err(malformed(&format!("invalid segment \"{}\"", seg)));
        }
        segments.push(full);
        Ok(())
    };

    for c in body.chars() {
        match c {
            '(' => {
                if group.is_some() {
                    return Err(malformed("nested '('"));
                }
                if after_group || cur.is_empty() {
                    return Err(malformed("missing namespace before '('"));
                }
                let ns = namespaces
                    .get(&cur)
                    .ok_or_else(|| CoreError::UndefinedNamespace(cur.clone()))?;
                group = Some(ns.prefix.clone());
                cur.clear();
            }
            ')' => {
                let Some(prefix) = group.take() else {
                    return Err(malformed("unbalanced ')'"));
                };
                push(&mut segments, &prefix, &cur)?;
                cur.clear();
                after_group = true;
            }
            ':' => {
                if after_group {
                    after_group = false;
                    continue;
                }
                let prefix = group.as_deref().unwrap_or("");
                push(&mut segments, prefix, &cur)?;
                cur.clear();
            }
            c => {
                if after_group {
                    return Err(malformed("expected ':' after ')'"));
                }
                cur.push(c);
            }
        }
    }

    if group.is_some() {
        return Err(malformed("unterminated '('"));
    }
    if !after_group {
        push(&mut segments, "", &cur)?;
    }

    Ok(ClassSpec { segments, libs })
}

/// Test a class lineage against an is-a pattern.
///
/// The pattern is a colon-separated class name; a trailing `*` segment
/// matches the named class and any of its subclasses. `*` alone matches
/// everything.
pub fn lineage_matches(lineage: &[String], pattern: &str) -> bool {
    let parts: Vec<&str> = pattern.split(':').collect();
    match parts.split_last() {
        Some((&"*", prefix)) => {
            lineage.len() >= prefix.len() && lineage.iter().zip(prefix).all(|(a, b)| a == b)
        }
        _ => lineage.len() == parts.len() && lineage.iter().zip(&parts).all(|(a, b)| a == b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hemi() -> Namespaces {
        let mut ns = Namespaces::new();
        ns.register("Hemi", "HM_", "https://example.invalid/hemi");
        ns.register("Game", "GM_", "");
        ns
    }

    #[test]
    fn test_plain_spec() {
        let spec = parse_class_spec("Root:Group:Leaf", &hemi()).unwrap();
        assert_eq!(spec.name(), "Root:Group:Leaf");
        assert_eq!(spec.short_name(), "Leaf");
        assert_eq!(spec.parent_name(), Some("Root:Group".to_string()));
        assert!(spec.libs.is_empty());
    }

    #[test]
    fn test_shorthand_expansion() {
        let spec = parse_class_spec("Hemi(Widget:Button):Game(Switch)", &hemi()).unwrap();
        assert_eq!(spec.name(), "HM_Widget:HM_Button:GM_Switch");

        let spec = parse_class_spec("HM_Widget:Game(Slider)@sliders,extra", &hemi()).unwrap();
        assert_eq!(spec.name(), "HM_Widget:GM_Slider");
        assert_eq!(spec.libs, vec!["sliders", "extra"]);
        assert_eq!(spec.symbol(), "GMSliderClass");
    }

    #[test]
    fn test_malformed_specs() {
        let ns = hemi();
        for bad in [
            "Hemi(Widget",
            "Widget)",
            "Hemi(Widget(Button))",
            "A::B",
            "A:",
            "Hemi(Widget)Button",
            "A B",
            "A@",
            "(Widget)",
        ] {
            let err = parse_class_spec(bad, &ns).unwrap_err();
            assert!(
                matches!(err, CoreError::MalformedSpec { .. }),
                "{} gave {:?}",
                bad,
                err
            );
        }
        assert!(matches!(
            parse_class_spec("Nope(Widget)", &ns),
            Err(CoreError::UndefinedNamespace(_))
        ));
    }

    #[test]
    fn test_lineage_matching() {
        let lineage: Vec<String> = ["HM_Widget", "HM_Button"].iter().map(|s| s.to_string()).collect();
        assert!(lineage_matches(&lineage, "HM_Widget:HM_Button"));
        assert!(lineage_matches(&lineage, "HM_Widget:*"));
        assert!(lineage_matches(&lineage, "HM_Widget:HM_Button:*"));
        assert!(lineage_matches(&lineage, "*"));
        assert!(!lineage_matches(&lineage, "HM_Widget"));
        assert!(!lineage_matches(&lineage, "HM_Window:*"));
        assert!(!lineage_matches(&lineage, "HM_Widget:HM_Button:HM_Toggle:*"));
    }

    #[test]
    fn test_namespace_owner() {
        let ns = hemi();
        assert_eq!(ns.owner_of("HM_Button").unwrap().name, "Hemi");
        assert!(ns.owner_of("Leaf").is_none());
    }
}
