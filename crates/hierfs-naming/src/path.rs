//! Hierarchical file system paths.
//!
//! A path is an immutable sequence of components. Root is the empty
//! sequence and renders as `/`. The ordering defined here (shorter paths
//! first, then by rendered string) is the global lock acquisition order:
//! any code that locks several paths locks them in ascending order.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Component separator.
pub const SEPARATOR: char = '/';

/// Character reserved by the wire format; never part of a component.
pub const DELIMITER: char = ':';

/// Errors from building or decomposing paths.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// Path strings must be absolute.
    #[error("path '{0}' does not start with '/'")]
    NotAbsolute(String),

    /// The string contains the reserved delimiter.
    #[error("path '{0}' contains the reserved delimiter ':'")]
    ReservedDelimiter(String),

    /// A component was empty or contained a separator or delimiter.
    #[error("invalid path component '{0}'")]
    InvalidComponent(String),

    /// The operation has no meaning for the root path.
    #[error("operation not defined on the root path")]
    Root,
}

/// An absolute path in the distributed file system.
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FsPath {
    components: Vec<String>,
}

impl FsPath {
    /// The root directory.
    pub fn root() -> Self {
        Self::default()
    }

    /// Returns this path with `component` appended.
    pub fn join(&self, component: &str) -> Result<Self, PathError> {
        if component.is_empty() || component.contains(SEPARATOR) || component.contains(DELIMITER) {
            return Err(PathError::InvalidComponent(component.to_string()));
        }
        let mut components = self.components.clone();
        components.push(component.to_string());
        Ok(Self { components })
    }

    /// True for `/`.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Number of components; root has depth 0.
    pub fn depth(&self) -> usize {
        self.components.len()
    }

    /// The path components, outermost first.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(String::as_str)
    }

    /// The containing directory.
    pub fn parent(&self) -> Result<Self, PathError> {
        match self.components.split_last() {
            Some((_, rest)) => Ok(Self {
                components: rest.to_vec(),
            }),
            None => Err(PathError::Root),
        }
    }

    /// The final component.
    pub fn last(&self) -> Result<&str, PathError> {
        self.components.last().map(String::as_str).ok_or(PathError::Root)
    }

    /// True if `other` is a prefix of this path. Every path is a subpath of
    /// itself and of root.
    pub fn is_subpath(&self, other: &FsPath) -> bool {
        self.components.starts_with(&other.components)
    }

    /// Every prefix from depth 1 up to and including this path, ascending.
    /// Empty for root.
    pub fn prefixes(&self) -> Vec<FsPath> {
        (1..=self.components.len())
            .map(|n| FsPath {
                components: self.components[..n].to_vec(),
            })
            .collect()
    }

    /// Like [`prefixes`](Self::prefixes) but led by root.
    pub fn prefixes_with_root(&self) -> Vec<FsPath> {
        let mut all = Vec::with_capacity(self.components.len() + 1);
        all.push(FsPath::root());
        all.extend(self.prefixes());
        all
    }

    /// Location of this path inside a local directory.
    pub fn to_local(&self, root: &Path) -> PathBuf {
        let mut local = root.to_path_buf();
        local.extend(self.components.iter());
        local
    }

    /// Builds a path from a path relative to some local root.
    pub fn from_relative(relative: &Path) -> Result<Self, PathError> {
        let mut path = FsPath::root();
        for component in relative.components() {
            match component {
                Component::Normal(name) => {
                    let name = name
                        .to_str()
                        .ok_or_else(|| PathError::InvalidComponent(name.to_string_lossy().into_owned()))?;
                    path = path.join(name)?;
                }
                Component::CurDir => {}
                other => {
                    return Err(PathError::InvalidComponent(
                        other.as_os_str().to_string_lossy().into_owned(),
                    ))
                }
            }
        }
        Ok(path)
    }
}

impl FromStr for FsPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.starts_with(SEPARATOR) {
            return Err(PathError::NotAbsolute(s.to_string()));
        }
        if s.contains(DELIMITER) {
            return Err(PathError::ReservedDelimiter(s.to_string()));
        }
        let components = s
            .split(SEPARATOR)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Self { components })
    }
}

impl TryFrom<String> for FsPath {
    type Error = PathError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<FsPath> for String {
    fn from(path: FsPath) -> String {
        path.to_string()
    }
}

impl fmt::Display for FsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return write!(f, "{}", SEPARATOR);
        }
        for component in &self.components {
            write!(f, "{}{}", SEPARATOR, component)?;
        }
        Ok(())
    }
}

impl fmt::Debug for FsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FsPath({})", self)
    }
}

impl Ord for FsPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.components
            .len()
            .cmp(&other.components.len())
            .then_with(|| self.to_string().cmp(&other.to_string()))
    }
}

impl PartialOrd for FsPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
