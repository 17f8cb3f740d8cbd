// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian package version string handling. */

use {
    std::{
        cmp::Ordering,
        fmt::{Display, Formatter},
        hash::{Hash, Hasher},
        num::ParseIntError,
        str::FromStr,
    },
    thiserror::Error,
};

#[derive(Clone, Debug, Error)]
pub enum VersionError {
    #[error("error parsing string to integer: {0}")]
    ParseInt(#[from] ParseIntError),

    #[error("the version string is empty")]
    Empty,

    #[error("the epoch component has non-digit characters: {0}")]
    EpochNonNumeric(String),

    #[error("upstream_version component has illegal character: {0}")]
    UpstreamVersionIllegalChar(String),

    #[error("debian_revision component has illegal character: {0}")]
    DebianRevisionIllegalChar(String),
}

pub type Result<T> = std::result::Result<T, VersionError>;

/// A Debian package version.
///
/// The format is `[epoch:]upstream_version[-debian_revision]`. Sorting follows
/// <https://www.debian.org/doc/debian-policy/ch-controlfields.html#version>.
/// Equality follows the ordering, so `1.0` equals `1.0-0`.
#[derive(Clone, Debug)]
pub struct DebianVersion {
    epoch: Option<u32>,
    upstream_version: String,
    debian_revision: Option<String>,
}

impl DebianVersion {
    /// Construct an instance by parsing a version string.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(VersionError::Empty);
        }

        let (epoch, remainder) = if let Some(pos) = s.find(':') {
            (Some(&s[0..pos]), &s[pos + 1..])
        } else {
            (None, s)
        };

        let (upstream, debian) = if let Some(pos) = remainder.rfind('-') {
            (&remainder[0..pos], Some(&remainder[pos + 1..]))
        } else {
            (remainder, None)
        };

        let epoch = if let Some(epoch) = epoch {
            if epoch.is_empty() || !epoch.chars().all(|c| c.is_ascii_digit()) {
                return Err(VersionError::EpochNonNumeric(s.to_string()));
            }

            Some(u32::from_str(epoch)?)
        } else {
            None
        };

        // Hyphens are only allowed in upstream_version if a revision is present. The
        // colon is tolerated since some archives carry it without an epoch.
        if upstream.is_empty()
            || !upstream.chars().all(|c| match c {
                c if c.is_ascii_alphanumeric() => true,
                '.' | '+' | '~' | ':' => true,
                '-' => debian.is_some(),
                _ => false,
            })
        {
            return Err(VersionError::UpstreamVersionIllegalChar(s.to_string()));
        }

        let debian_revision = if let Some(debian) = debian {
            if !debian.chars().all(|c| match c {
                c if c.is_ascii_alphanumeric() => true,
                '+' | '.' | '~' => true,
                _ => false,
            }) {
                return Err(VersionError::DebianRevisionIllegalChar(s.to_string()));
            }

            Some(debian.to_string())
        } else {
            None
        };

        Ok(Self {
            epoch,
            upstream_version: upstream.to_string(),
            debian_revision,
        })
    }

    /// The `epoch` component of the version string, if present.
    pub fn epoch(&self) -> Option<u32> {
        self.epoch
    }

    /// Value of `epoch`, defaulting to `0`.
    pub fn epoch_assumed(&self) -> u32 {
        self.epoch.unwrap_or(0)
    }

    /// `upstream` component of the version string.
    pub fn upstream_version(&self) -> &str {
        &self.upstream_version
    }

    /// `debian_revision` component of the version string.
    pub fn debian_revision(&self) -> Option<&str> {
        self.debian_revision.as_deref()
    }
}

impl Display for DebianVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(epoch) = self.epoch {
            write!(f, "{}:", epoch)?;
        }

        write!(f, "{}", self.upstream_version)?;

        if let Some(revision) = &self.debian_revision {
            write!(f, "-{}", revision)?;
        }

        Ok(())
    }
}

impl FromStr for DebianVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Weight of a character in the non-digit part of a version.
///
/// `~` sorts before everything, even the end of the part. Letters sort
/// before all other characters. End of part is `0`.
fn char_weight(c: Option<u8>) -> i32 {
    match c {
        None => 0,
        Some(b'~') => -1,
        Some(c) if c.is_ascii_alphabetic() => c as i32,
        Some(c) => c as i32 + 256,
    }
}

fn lexical_compare(a: &[u8], b: &[u8]) -> Ordering {
    for pos in 0..a.len().max(b.len()) {
        match char_weight(a.get(pos).copied()).cmp(&char_weight(b.get(pos).copied())) {
            Ordering::Equal => {}
            res => return res,
        }
    }

    Ordering::Equal
}

fn split_leading(s: &[u8], digits: bool) -> (&[u8], &[u8]) {
    let pos = s
        .iter()
        .position(|c| c.is_ascii_digit() != digits)
        .unwrap_or(s.len());

    (&s[0..pos], &s[pos..])
}

fn numeric_compare(a: &[u8], b: &[u8]) -> Ordering {
    let a = trim_zeros(a);
    let b = trim_zeros(b);

    // Compare by length first so arbitrarily long digit runs cannot overflow.
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn trim_zeros(s: &[u8]) -> &[u8] {
    let pos = s.iter().position(|c| *c != b'0').unwrap_or(s.len());
    &s[pos..]
}

/// Compare a version component string using Debian rules.
///
/// Alternates between comparing a leading non-digit run lexically and a leading
/// digit run numerically until both inputs are exhausted.
pub(crate) fn compare_component(a: &str, b: &str) -> Ordering {
    let mut a = a.as_bytes();
    let mut b = b.as_bytes();

    while !a.is_empty() || !b.is_empty() {
        let (a_text, a_rest) = split_leading(a, false);
        let (b_text, b_rest) = split_leading(b, false);

        match lexical_compare(a_text, b_text) {
            Ordering::Equal => {}
            res => return res,
        }

        let (a_num, a_rest) = split_leading(a_rest, true);
        let (b_num, b_rest) = split_leading(b_rest, true);

        match numeric_compare(a_num, b_num) {
            Ordering::Equal => {}
            res => return res,
        }

        a = a_rest;
        b = b_rest;
    }

    Ordering::Equal
}

/// The `(non-digit, digit)` runs [compare_component] walks, with leading zeros
/// of digit runs and empty pairs removed.
fn normalized_runs(s: &str) -> Vec<(&[u8], &[u8])> {
    let mut s = s.as_bytes();
    let mut result = vec![];

    while !s.is_empty() {
        let (text, rest) = split_leading(s, false);
        let (number, rest) = split_leading(rest, true);
        let number = trim_zeros(number);

        if !text.is_empty() || !number.is_empty() {
            result.push((text, number));
        }

        s = rest;
    }

    result
}

impl PartialEq for DebianVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DebianVersion {}

impl Hash for DebianVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.epoch_assumed().hash(state);
        normalized_runs(&self.upstream_version).hash(state);
        normalized_runs(self.debian_revision.as_deref().unwrap_or("0")).hash(state);
    }
}

impl PartialOrd<Self> for DebianVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DebianVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        // The absence of a debian revision is equivalent to `0`.
        self.epoch_assumed()
            .cmp(&other.epoch_assumed())
            .then_with(|| compare_component(&self.upstream_version, &other.upstream_version))
            .then_with(|| {
                compare_component(
                    self.debian_revision.as_deref().unwrap_or("0"),
                    other.debian_revision.as_deref().unwrap_or("0"),
                )
            })
    }
}
