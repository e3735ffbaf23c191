//! Search-path table
//!
//! Ordered directory lists grouped by purpose. Lookups return the first
//! directory containing the requested file; in the font group the directory
//! that satisfied a lookup is moved to the front so that later lookups try it
//! first.

use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::error::{CoreError, CoreResult};

/// Longest path the table will build
pub const MAX_PATH_LEN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathGroup {
    /// Application data (saved objects, resources)
    Data,
    Fonts,
    Temp,
}

impl PathGroup {
    pub const ALL: [PathGroup; 3] = [PathGroup::Data, PathGroup::Fonts, PathGroup::Temp];

    fn index(self) -> usize {
        match self {
            PathGroup::Data => 0,
            PathGroup::Fonts => 1,
            PathGroup::Temp => 2,
        }
    }

    /// Whether successful lookups reorder this group
    pub fn promotes_on_hit(self) -> bool {
        self == PathGroup::Fonts
    }
}

impl fmt::Display for PathGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathGroup::Data => write!(f, "data"),
            PathGroup::Fonts => write!(f, "fonts"),
            PathGroup::Temp => write!(f, "temp"),
        }
    }
}

impl FromStr for PathGroup {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "data" => Ok(PathGroup::Data),
            "fonts" | "font" => Ok(PathGroup::Fonts),
            "temp" | "tmp" => Ok(PathGroup::Temp),
            _ => Err(CoreError::NoSuchPath(format!("unknown path group \"{}\"", s))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchPaths {
    groups: [Vec<PathBuf>; 3],
}

impl SearchPaths {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the table from the configured directory lists
    pub fn from_config(config: &Config) -> CoreResult<Self> {
        let mut paths = Self::new();
        for dir in &config.data_paths {
            paths.add(PathGroup::Data, dir)?;
        }
        for dir in &config.font_paths {
            paths.add(PathGroup::Fonts, dir)?;
        }
        for dir in &config.temp_paths {
            paths.add(PathGroup::Temp, dir)?;
        }
        Ok(paths)
    }

    /// Directories of a group in search order
    pub fn get(&self, group: PathGroup) -> &[PathBuf] {
        &self.groups[group.index()]
    }

    /// Append a directory to a group; duplicates are ignored
    pub fn add(&mut self, group: PathGroup, dir: impl AsRef<Path>) -> CoreResult<()> {
        let dir = dir.as_ref();
        check_len(dir)?;
        let list = &mut self.groups[group.index()];
        if !list.iter().any(|d| d == dir) {
            list.push(dir.to_path_buf());
        }
        Ok(())
    }

    /// Append every entry of a platform path list (`a:b:c` on Unix)
    pub fn add_list(&mut self, group: PathGroup, list: &OsStr) -> CoreResult<()> {
        for dir in std::env::split_paths(list) {
            if !dir.as_os_str().is_empty() {
                self.add(group, dir)?;
            }
        }
        Ok(())
    }

    /// Remove a directory from a group
    pub fn remove(&mut self, group: PathGroup, dir: impl AsRef<Path>) -> bool {
        let dir = dir.as_ref();
        let list = &mut self.groups[group.index()];
        let before = list.len();
        list.retain(|d| d != dir);
        list.len() != before
    }

    pub fn clear(&mut self, group: PathGroup) {
        self.groups[group.index()].clear();
    }

    /// Find the first directory of `group` containing `file`.
    ///
    /// Promotes the matching directory to the front of the font group.
    pub fn find(&mut self, group: PathGroup, file: &str) -> CoreResult<PathBuf> {
        let list = &mut self.groups[group.index()];
        let mut hit = None;
        for (i, dir) in list.iter().enumerate() {
            let candidate = dir.join(file);
            check_len(&candidate)?;
            if candidate.is_file() {
                hit = Some((i, candidate));
                break;
            }
        }

        let Some((i, path)) = hit else {
            return Err(CoreError::NoSuchPath(format!("{} (in {} paths)", file, group)));
        };
        if group.promotes_on_hit() && i > 0 {
            let dir = list.remove(i);
            debug!("promoting {} in {} paths", dir.display(), group);
            list.insert(0, dir);
        }
        Ok(path)
    }

    /// Path for a new file in the first directory of `group`
    pub fn first_dir_path(&self, group: PathGroup, file: &str) -> CoreResult<PathBuf> {
        let dir = self.groups[group.index()]
            .first()
            .ok_or_else(|| CoreError::NoSuchPath(format!("no {} paths configured", group)))?;
        let path = dir.join(file);
        check_len(&path)?;
        Ok(path)
    }
}

fn check_len(path: &Path) -> CoreResult<()> {
    let len = path.as_os_str().len();
    if len > MAX_PATH_LEN {
        return Err(CoreError::PathOverflow(len, MAX_PATH_LEN));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_font_lookup_promotes_hit() {
        let root = tempfile::tempdir().unwrap();
        let a = root.path().join("a");
        let b = root.path().join("b");
        fs::create_dir_all(&a).unwrap();
        fs::create_dir_all(&b).unwrap();
        fs::write(b.join("only-b.ttf"), b"b").unwrap();
        fs::write(a.join("both.ttf"), b"a").unwrap();
        fs::write(b.join("both.ttf"), b"b").unwrap();

        let mut paths = SearchPaths::new();
        paths.add(PathGroup::Fonts, &a).unwrap();
        paths.add(PathGroup::Fonts, &b).unwrap();

        let found = paths.find(PathGroup::Fonts, "only-b.ttf").unwrap();
        assert_eq!(found, b.join("only-b.ttf"));
        assert_eq!(paths.get(PathGroup::Fonts), &[b.clone(), a.clone()]);

        let found = paths.find(PathGroup::Fonts, "both.ttf").unwrap();
        assert_eq!(found, b.join("both.ttf"));
    }

    #[test]
    fn test_data_lookup_does_not_reorder() {
        let root = tempfile::tempdir().unwrap();
        let a = root.path().join("a");
        let b = root.path().join("b");
        fs::create_dir_all(&a).unwrap();
        fs::create_dir_all(&b).unwrap();
        fs::write(b.join("obj.dat"), b"x").unwrap();

        let mut paths = SearchPaths::new();
        paths.add(PathGroup::Data, &a).unwrap();
        paths.add(PathGroup::Data, &b).unwrap();
        paths.find(PathGroup::Data, "obj.dat").unwrap();
        assert_eq!(paths.get(PathGroup::Data), &[a, b]);
    }

    #[test]
    fn test_missing_file() {
        let root = tempfile::tempdir().unwrap();
        let mut paths = SearchPaths::new();
        paths.add(PathGroup::Data, root.path()).unwrap();
        assert!(matches!(
            paths.find(PathGroup::Data, "nope.dat"),
            Err(CoreError::NoSuchPath(_))
        ));
    }

    #[test]
    fn test_add_remove_and_overflow() {
        let mut paths = SearchPaths::new();
        paths.add(PathGroup::Temp, "/tmp").unwrap();
        paths.add(PathGroup::Temp, "/tmp").unwrap();
        assert_eq!(paths.get(PathGroup::Temp).len(), 1);
        assert!(paths.remove(PathGroup::Temp, "/tmp"));
        assert!(!paths.remove(PathGroup::Temp, "/tmp"));

        let long = format!("/{}", "x".repeat(MAX_PATH_LEN));
        assert!(matches!(
            paths.add(PathGroup::Data, &long),
            Err(CoreError::PathOverflow(..))
        ));
    }

    #[test]
    fn test_group_parsing() {
        assert_eq!("fonts".parse::<PathGroup>().unwrap(), PathGroup::Fonts);
        assert_eq!("DATA".parse::<PathGroup>().unwrap(), PathGroup::Data);
        assert!("bogus".parse::<PathGroup>().is_err());
    }
}
