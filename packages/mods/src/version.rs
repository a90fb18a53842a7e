use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModError;

/// A dotted numeric version such as `1.4`, `v2.0.1` or `3.0.0-beta.2`.
///
/// Missing components compare as zero, so `1.2` equals `1.2.0`.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    parts: Vec<u64>,
    pub pre_release: Option<String>,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            parts: vec![major, minor, patch],
            pre_release: None,
        }
    }

    fn part(&self, index: usize) -> u64 {
        self.parts.get(index).copied().unwrap_or(0)
    }

    pub fn major(&self) -> u64 {
        self.part(0)
    }

    pub fn minor(&self) -> u64 {
        self.part(1)
    }

    pub fn patch(&self) -> u64 {
        self.part(2)
    }

    /// Number of components that were written out.
    pub fn precision(&self) -> usize {
        self.parts.len()
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre_release.is_some()
    }

    /// Compare numeric components only.
    fn cmp_core(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        (0..len)
            .map(|i| self.part(i).cmp(&other.part(i)))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

fn cmp_pre_release(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(l), Ok(r)) => l.cmp(&r),
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => l.cmp(r),
                };
                if ord.is_ne() {
                    return ord;
                }
            }
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_core(other)
            .then_with(|| match (&self.pre_release, &other.pre_release) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => cmp_pre_release(a, b),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl FromStr for Version {
    type Err = ModError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ModError::InvalidVersion(s.to_string());
        let trimmed = s.trim();
        let trimmed = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        // Build metadata never affects ordering.
        let without_build = trimmed.split('+').next().unwrap_or_default();

        let (core, pre_release) = match without_build.split_once('-') {
            Some((core, pre)) => {
                let valid = !pre.is_empty()
                    && pre
                        .split('.')
                        .all(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
                if !valid {
                    return Err(invalid());
                }
                (core, Some(pre.to_string()))
            }
            None => (without_build, None),
        };

        let parts = core
            .split('.')
            .map(|p| p.parse::<u64>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { parts, pre_release })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core: Vec<String> = self.parts.iter().map(u64::to_string).collect();
        f.write_str(&core.join("."))?;
        if let Some(pre) = &self.pre_release {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

impl TryFrom<String> for Version {
    type Error = ModError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Exact,
    Greater,
    GreaterEq,
    Less,
    LessEq,
    /// Same left-most non-zero component.
    Caret,
    /// Same major and minor when a minor was given, else same major.
    Tilde,
}

impl Op {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "=",
            Self::Greater => ">",
            Self::GreaterEq => ">=",
            Self::Less => "<",
            Self::LessEq => "<=",
            Self::Caret => "^",
            Self::Tilde => "~",
        }
    }
}

/// Longest prefixes first so `>=` is not read as `>`.
const OPS: &[(&str, Op)] = &[
    (">=", Op::GreaterEq),
    ("<=", Op::LessEq),
    ("==", Op::Exact),
    (">", Op::Greater),
    ("<", Op::Less),
    ("=", Op::Exact),
    ("^", Op::Caret),
    ("~", Op::Tilde),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparator {
    pub op: Op,
    pub version: Version,
}

impl Comparator {
    pub fn matches(&self, candidate: &Version) -> bool {
        let v = &self.version;
        match self.op {
            Op::Exact => candidate == v,
            Op::Greater => candidate > v,
            Op::GreaterEq => candidate >= v,
            Op::Less => candidate < v,
            Op::LessEq => candidate <= v,
            Op::Caret => candidate >= v && candidate.cmp_core(&caret_upper(v)).is_lt(),
            Op::Tilde => candidate >= v && candidate.cmp_core(&tilde_upper(v)).is_lt(),
        }
    }
}

fn caret_upper(v: &Version) -> Version {
    if v.major() > 0 || v.precision() == 1 {
        Version::new(v.major() + 1, 0, 0)
    } else if v.minor() > 0 || v.precision() == 2 {
        Version::new(0, v.minor() + 1, 0)
    } else {
        Version::new(0, 0, v.patch() + 1)
    }
}

fn tilde_upper(v: &Version) -> Version {
    if v.precision() >= 2 {
        Version::new(v.major(), v.minor() + 1, 0)
    } else {
        Version::new(v.major() + 1, 0, 0)
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op.as_str(), self.version)
    }
}

/// A conjunction of comparators, e.g. `>=1.2, <2.0`. Empty matches anything.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionRequirement {
    comparators: Vec<Comparator>,
}

impl VersionRequirement {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn is_any(&self) -> bool {
        self.comparators.is_empty()
    }

    pub fn comparators(&self) -> &[Comparator] {
        &self.comparators
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.comparators.iter().all(|c| c.matches(version))
    }

    /// False for strings that are not versions at all.
    pub fn matches_str(&self, version: &str) -> bool {
        version
            .parse::<Version>()
            .is_ok_and(|v| self.matches(&v))
    }
}

impl FromStr for VersionRequirement {
    type Err = ModError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut comparators = Vec::new();
        for term in s.split(',').map(str::trim) {
            if term.is_empty() || term == "*" {
                continue;
            }
            let (op, rest) = OPS
                .iter()
                .find_map(|(prefix, op)| term.strip_prefix(prefix).map(|rest| (*op, rest)))
                .unwrap_or((Op::Exact, term));
            let version = rest
                .trim()
                .parse::<Version>()
                .map_err(|_| ModError::InvalidRequirement(s.to_string()))?;
            comparators.push(Comparator { op, version });
        }
        Ok(Self { comparators })
    }
}

impl fmt::Display for VersionRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.comparators.is_empty() {
            return f.write_str("*");
        }
        let terms: Vec<String> = self.comparators.iter().map(Comparator::to_string).collect();
        f.write_str(&terms.join(", "))
    }
}

impl TryFrom<String> for VersionRequirement {
    type Error = ModError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VersionRequirement> for String {
    fn from(value: VersionRequirement) -> Self {
        value.to_string()
    }
}

/// Whether two version labels name the same version.
///
/// Labels that do not parse are compared verbatim.
pub fn same_version(a: &str, b: &str) -> bool {
    match (a.parse::<Version>(), b.parse::<Version>()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a.trim() == b.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    fn req(s: &str) -> VersionRequirement {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_and_order() {
        assert_eq!(v("v1.2"), v("1.2.0"));
        assert!(v("1.10.0") > v("1.9.3"));
        assert!(v("2.0.0-beta") < v("2.0.0"));
        assert!(v("2.0.0-beta.2") < v("2.0.0-beta.10"));
        assert!(v("2.0.0-alpha") < v("2.0.0-beta"));
        assert_eq!(v("1.0.0+build.5"), v("1.0.0"));
        assert_eq!(v("V3.1-rc1").to_string(), "3.1-rc1");

        for bad in ["", "1..2", "a.b", "1.0-", "1.0-be ta"] {
            assert!(bad.parse::<Version>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_comparison_operators() {
        assert!(req(">=2.0").matches(&v("2.0")));
        assert!(!req(">=2.0").matches(&v("1.0")));
        assert!(req(">1.0").matches(&v("1.0.1")));
        assert!(req("<2").matches(&v("1.99")));
        assert!(req("<=1.5").matches(&v("1.5.0")));
        assert!(req("=1.2").matches(&v("1.2.0")));
        assert!(req("1.2.3").matches(&v("v1.2.3")));
        assert!(!req("1.2.3").matches(&v("1.2.4")));
    }

    #[test]
    fn test_caret_and_tilde() {
        assert!(req("^1.2").matches(&v("1.9.0")));
        assert!(!req("^1.2").matches(&v("2.0.0")));
        assert!(!req("^1.2").matches(&v("2.0.0-beta")));
        assert!(req("^0.3.1").matches(&v("0.3.9")));
        assert!(!req("^0.3.1").matches(&v("0.4.0")));
        assert!(!req("^0.0.3").matches(&v("0.0.4")));

        assert!(req("~1.2").matches(&v("1.2.7")));
        assert!(!req("~1.2").matches(&v("1.3.0")));
        assert!(req("~1").matches(&v("1.8")));
    }

    #[test]
    fn test_conjunction_and_wildcard() {
        let range = req(">=1.2, <2.0");
        assert!(range.matches(&v("1.5")));
        assert!(!range.matches(&v("2.0")));
        assert!(!range.matches(&v("1.1")));
        assert_eq!(range.to_string(), ">=1.2, <2.0");

        assert!(req("*").is_any());
        assert!(req("").matches(&v("0.0.1")));
        assert!(!req("*").matches_str("not-a-version"));
        assert!(">=x".parse::<VersionRequirement>().is_err());
    }

    #[test]
    fn test_serde_as_strings() {
        let parsed: VersionRequirement = serde_json::from_str(r#"">=2.0""#).unwrap();
        assert_eq!(parsed, req(">=2.0"));
        assert_eq!(serde_json::to_string(&v("1.4")).unwrap(), r#""1.4""#);
        assert!(serde_json::from_str::<Version>(r#""nope""#).is_err());
    }

    #[test]
    fn test_same_version() {
        assert!(same_version("1.0", "v1.0.0"));
        assert!(!same_version("1.0", "1.0.1"));
        assert!(same_version("release-A", "release-A"));
    }
}
