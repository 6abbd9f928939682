//! Register paths: slash-separated names addressing an entry in a catalogue.
//!
//! Map-file authors may use `.` as an alternate separator; both spellings
//! normalize to the same path.

use std::fmt;

/// A normalized register path.
///
/// Stored without leading or trailing separators, with `.` translated to `/`
/// and empty components removed, so that `APP.MODULE.REG`, `/APP/MODULE/REG`
/// and `APP/MODULE/REG` all compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegisterPath(String);

impl RegisterPath {
    #[must_use]
    pub fn new(raw: &str) -> Self {
        let normalized = raw
            .split(['/', '.'])
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        RegisterPath(normalized)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|c| !c.is_empty())
    }

    /// Appends one more component (or sub-path) to this path.
    #[must_use]
    pub fn join(&self, tail: &str) -> Self {
        if self.0.is_empty() {
            RegisterPath::new(tail)
        } else {
            RegisterPath::new(&format!("{}/{tail}", self.0))
        }
    }

    /// Splits off the last component, returning the enclosing module path and
    /// the plain register name.
    #[must_use]
    pub fn split_last(&self) -> (RegisterPath, &str) {
        match self.0.rsplit_once('/') {
            Some((module, name)) => (RegisterPath(module.to_string()), name),
            None => (RegisterPath::default(), &self.0),
        }
    }

    #[must_use]
    pub fn first_component(&self) -> &str {
        self.components().next().unwrap_or("")
    }
}

impl fmt::Display for RegisterPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RegisterPath {
    fn from(raw: &str) -> Self {
        RegisterPath::new(raw)
    }
}

impl From<String> for RegisterPath {
    fn from(raw: String) -> Self {
        RegisterPath::new(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        assert_eq!(RegisterPath::new("APP.MOD.REG"), RegisterPath::new("APP/MOD/REG"));
        assert_eq!(RegisterPath::new("/APP//MOD/"), RegisterPath::new("APP/MOD"));
        assert_eq!(RegisterPath::new("REG").as_str(), "REG");
    }

    #[test]
    fn test_split_last() {
        let p = RegisterPath::new("APP/MOD/REG");
        let (module, name) = p.split_last();
        assert_eq!(module.as_str(), "APP/MOD");
        assert_eq!(name, "REG");

        let flat = RegisterPath::new("REG");
        let (module, name) = flat.split_last();
        assert_eq!(module.as_str(), "");
        assert_eq!(name, "REG");
    }

    #[test]
    fn test_join() {
        let p = RegisterPath::new("APP");
        assert_eq!(p.join("REG").as_str(), "APP/REG");
        assert_eq!(RegisterPath::default().join("REG").as_str(), "REG");
    }
}
