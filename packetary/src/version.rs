// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Package versions.

Every repository family orders versions its own way. [RpmVersion] implements the
`rpmvercmp` flavored ordering of YUM repositories and
[crate::drivers::deb::version::DebianVersion] the Debian policy ordering.
[PackageVersion] wraps both so indices can be shared between families.
*/

use {
    crate::{
        drivers::deb::version::DebianVersion,
        error::{PacketaryError, Result},
    },
    std::{
        cmp::Ordering,
        fmt::{Display, Formatter},
        hash::{Hash, Hasher},
        str::FromStr,
    },
};

/// A version of an RPM package.
///
/// `version` and `release` are stored as their `.` separated components.
/// Equality follows the ordering, so `1.01` equals `1.1`.
#[derive(Clone, Debug)]
pub struct RpmVersion {
    pub epoch: u64,
    pub version: Vec<String>,
    pub release: Vec<String>,
}

fn split_components(s: &str) -> Vec<String> {
    if s.is_empty() {
        vec![]
    } else {
        s.split('.').map(|x| x.to_string()).collect()
    }
}

impl RpmVersion {
    /// Construct an instance from its parts.
    pub fn new(epoch: u64, version: &str, release: &str) -> Self {
        Self {
            epoch,
            version: split_components(version),
            release: split_components(release),
        }
    }

    /// Construct an instance by parsing `[epoch:]version[-release]`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(PacketaryError::VersionParse(s.to_string()));
        }

        let (epoch, remainder) = match s.split_once(':') {
            Some((epoch, remainder)) => (
                u64::from_str(epoch).map_err(|_| PacketaryError::VersionParse(s.to_string()))?,
                remainder,
            ),
            None => (0, s),
        };

        let (version, release) = remainder.rsplit_once('-').unwrap_or((remainder, ""));

        Ok(Self::new(epoch, version, release))
    }
}

impl Display for RpmVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.epoch,
            self.version.join("."),
            self.release.join(".")
        )
    }
}

/// Weight of a character when comparing non numeric runs.
fn rpm_char_weight(c: u8) -> u32 {
    if c.is_ascii_digit() {
        c as u32 + 1
    } else if c.is_ascii_alphabetic() {
        c as u32
    } else {
        c as u32 + 256
    }
}

/// Split a component into alternating runs of digits and non-digits.
fn runs(s: &str) -> Vec<&str> {
    let bytes = s.as_bytes();
    let mut result = vec![];
    let mut start = 0;

    for pos in 1..=bytes.len() {
        if pos == bytes.len() || bytes[pos].is_ascii_digit() != bytes[start].is_ascii_digit() {
            result.push(&s[start..pos]);
            start = pos;
        }
    }

    result
}

fn compare_numeric_run(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');

    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn compare_text_run(a: &str, b: &str) -> Ordering {
    a.bytes()
        .map(rpm_char_weight)
        .cmp(b.bytes().map(rpm_char_weight))
}

/// Compare a single version or release component.
fn compare_rpm_component(a: &str, b: &str) -> Ordering {
    let a_runs = runs(a);
    let b_runs = runs(b);

    for (x, y) in a_runs.iter().zip(b_runs.iter()) {
        let x_numeric = x.as_bytes()[0].is_ascii_digit();
        let y_numeric = y.as_bytes()[0].is_ascii_digit();

        let res = if x_numeric && y_numeric {
            compare_numeric_run(x, y)
        } else {
            compare_text_run(x, y)
        };

        if res != Ordering::Equal {
            return res;
        }
    }

    a_runs.len().cmp(&b_runs.len())
}

fn compare_rpm_components(a: &[String], b: &[String]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match compare_rpm_component(x, y) {
            Ordering::Equal => {}
            res => return res,
        }
    }

    a.len().cmp(&b.len())
}

/// Component runs with leading zeros of numeric runs removed.
fn normalized_runs(component: &str) -> Vec<&str> {
    runs(component)
        .into_iter()
        .map(|run| {
            if run.as_bytes()[0].is_ascii_digit() {
                run.trim_start_matches('0')
            } else {
                run
            }
        })
        .collect()
}

impl PartialEq for RpmVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RpmVersion {}

impl Hash for RpmVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.epoch.hash(state);
        for components in [&self.version, &self.release] {
            components.len().hash(state);
            for component in components {
                normalized_runs(component).hash(state);
            }
        }
    }
}

impl PartialOrd<Self> for RpmVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RpmVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| compare_rpm_components(&self.version, &other.version))
            .then_with(|| compare_rpm_components(&self.release, &other.release))
    }
}

/// The version of a package of any supported family.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum PackageVersion {
    Deb(DebianVersion),
    Rpm(RpmVersion),
}

impl PackageVersion {
    /// Compare two versions, returning a negative, zero or positive number.
    ///
    /// All comparison operators are derived from the sign of this value.
    pub fn cmp_value(&self, other: &Self) -> i32 {
        match self.cmp(other) {
            Ordering::Less => -1,
            Ordering::Equal => 0,
            Ordering::Greater => 1,
        }
    }
}

impl Display for PackageVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deb(v) => v.fmt(f),
            Self::Rpm(v) => v.fmt(f),
        }
    }
}

impl PartialOrd<Self> for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Deb(a), Self::Deb(b)) => a.cmp(b),
            (Self::Rpm(a), Self::Rpm(b)) => a.cmp(b),
            // Families never mix within an index; keep the order total anyway.
            (Self::Deb(_), Self::Rpm(_)) => Ordering::Less,
            (Self::Rpm(_), Self::Deb(_)) => Ordering::Greater,
        }
    }
}

impl From<DebianVersion> for PackageVersion {
    fn from(v: DebianVersion) -> Self {
        Self::Deb(v)
    }
}

impl From<RpmVersion> for PackageVersion {
    fn from(v: RpmVersion) -> Self {
        Self::Rpm(v)
    }
}

/// Version syntax and ordering of a repository family.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VersionScheme {
    Deb,
    Rpm,
}

impl VersionScheme {
    /// Parse a version string according to this scheme.
    pub fn parse(&self, s: &str) -> Result<PackageVersion> {
        Ok(match self {
            Self::Deb => PackageVersion::Deb(DebianVersion::parse(s)?),
            Self::Rpm => PackageVersion::Rpm(RpmVersion::parse(s)?),
        })
    }
}
