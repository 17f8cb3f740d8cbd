// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Relations between packages.

A [PackageRelation] is a chain of alternatives (`a | b | c`), each naming a
package and a [VersionRange] its version must fall in.
*/

use {
    crate::{
        error::{PacketaryError, Result},
        version::{PackageVersion, VersionScheme},
    },
    std::{
        fmt::{Display, Formatter},
        hash::{Hash, Hasher},
    },
};

/// Comparison operator of a [VersionRange].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RangeOp {
    /// Any version.
    Any,
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
}

impl RangeOp {
    /// Resolve an operator from its textual form.
    ///
    /// Both the mnemonic (`ge`) and Debian symbolic (`>=`) spellings are accepted.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lt" | "<<" => Some(Self::Lt),
            "le" | "<=" | "<" => Some(Self::Le),
            "eq" | "=" => Some(Self::Eq),
            "ge" | ">=" | ">" => Some(Self::Ge),
            "gt" | ">>" => Some(Self::Gt),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Eq => "eq",
            Self::Ge => "ge",
            Self::Gt => "gt",
        }
    }

    /// Evaluate `left <op> right`.
    pub fn apply(&self, left: &PackageVersion, right: &PackageVersion) -> bool {
        match self {
            Self::Any => true,
            Self::Lt => left < right,
            Self::Le => left <= right,
            Self::Eq => left.cmp_value(right) == 0,
            Self::Ge => left >= right,
            Self::Gt => left > right,
        }
    }

    fn is_upper_bound(&self) -> bool {
        matches!(self, Self::Lt | Self::Le)
    }

    fn is_lower_bound(&self) -> bool {
        matches!(self, Self::Gt | Self::Ge)
    }
}

/// A range of versions expressed as an operator and an edge.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct VersionRange {
    op: RangeOp,
    edge: Option<PackageVersion>,
}

impl Default for VersionRange {
    fn default() -> Self {
        Self::any()
    }
}

impl VersionRange {
    /// A range matching every version.
    pub fn any() -> Self {
        Self {
            op: RangeOp::Any,
            edge: None,
        }
    }

    /// Construct a bounded range.
    ///
    /// [RangeOp::Any] discards the edge.
    pub fn new(op: RangeOp, edge: PackageVersion) -> Self {
        if op == RangeOp::Any {
            Self::any()
        } else {
            Self {
                op,
                edge: Some(edge),
            }
        }
    }

    pub fn op(&self) -> RangeOp {
        self.op
    }

    pub fn edge(&self) -> Option<&PackageVersion> {
        self.edge.as_ref()
    }

    /// Whether a version falls into this range.
    pub fn contains(&self, version: &PackageVersion) -> bool {
        match &self.edge {
            Some(edge) => self.op.apply(version, edge),
            None => true,
        }
    }

    /// Whether there is a version satisfying both ranges.
    pub fn intersects(&self, other: &Self) -> bool {
        let (a, b) = match (&self.edge, &other.edge) {
            (Some(a), Some(b)) => (a, b),
            _ => return true,
        };

        let (op1, op2) = (self.op, other.op);

        if (op1.is_upper_bound() && op2.is_upper_bound())
            || (op1.is_lower_bound() && op2.is_lower_bound())
        {
            // Bounds pointing the same way share every version beyond the tighter
            // edge, even when both edges are equal and strict.
            true
        } else if op1 == RangeOp::Eq {
            op2.apply(a, b)
        } else if op2 == RangeOp::Eq {
            op1.apply(b, a)
        } else {
            op2.apply(a, b) && op1.apply(b, a)
        }
    }
}

impl Display for VersionRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.edge {
            Some(edge) => write!(f, "{} {}", self.op.as_str(), edge),
            None => f.write_str(self.op.as_str()),
        }
    }
}

/// A requirement on a package, with optional alternatives.
///
/// Equality and hashing only consider the first alternative's name and range.
#[derive(Clone, Debug)]
pub struct PackageRelation {
    pub name: String,
    pub version: VersionRange,
    pub alternative: Option<Box<PackageRelation>>,
}

impl PartialEq for PackageRelation {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.version == other.version
    }
}

impl Eq for PackageRelation {}

impl Hash for PackageRelation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.version.hash(state);
    }
}

impl PackageRelation {
    /// Construct a relation without alternatives.
    pub fn new(name: impl ToString, version: VersionRange) -> Self {
        Self {
            name: name.to_string(),
            version,
            alternative: None,
        }
    }

    /// Build a chain from `(name, range)` pairs, the first being the head.
    pub fn from_args<S: ToString>(
        args: impl IntoIterator<Item = (S, VersionRange)>,
    ) -> Result<Self> {
        let mut items = args
            .into_iter()
            .map(|(name, version)| Self::new(name, version))
            .collect::<Vec<_>>();

        let mut head = items
            .pop()
            .ok_or_else(|| PacketaryError::RelationParse("empty relation".to_string()))?;

        while let Some(mut previous) = items.pop() {
            previous.alternative = Some(Box::new(head));
            head = previous;
        }

        Ok(head)
    }

    /// Parse `NAME [OP VERSION] [| NAME [OP VERSION]]...`.
    pub fn parse(s: &str, scheme: VersionScheme) -> Result<Self> {
        let mut args = vec![];

        for alternative in s.split('|') {
            let cleaned = alternative.replace(['(', ')'], " ");
            let tokens = cleaned.split_ascii_whitespace().collect::<Vec<_>>();

            let version = match tokens.as_slice() {
                [_] => VersionRange::any(),
                [_, op, edge] => {
                    let op = RangeOp::parse(op)
                        .ok_or_else(|| PacketaryError::RelationParse(s.to_string()))?;
                    VersionRange::new(op, scheme.parse(edge)?)
                }
                _ => return Err(PacketaryError::RelationParse(s.to_string())),
            };

            args.push((tokens[0].to_string(), version));
        }

        Self::from_args(args)
    }

    /// Iterate over this relation and its alternatives.
    pub fn iter(&self) -> impl Iterator<Item = &PackageRelation> + '_ {
        std::iter::successors(Some(self), |r| r.alternative.as_deref())
    }
}

impl Display for PackageRelation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.version.op() == RangeOp::Any {
            f.write_str(&self.name)?;
        } else {
            write!(f, "{} ({})", self.name, self.version)?;
        }

        if let Some(alternative) = &self.alternative {
            write!(f, " | {}", alternative)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn range(op: RangeOp, edge: &str) -> VersionRange {
        VersionRange::new(op, VersionScheme::Rpm.parse(edge).unwrap())
    }

    #[test]
    fn intersection_table() {
        use RangeOp::*;

        let cases = [
            (VersionRange::any(), range(Eq, "1"), true),
            (range(Lt, "3"), range(Le, "1"), true),
            (range(Gt, "3"), range(Ge, "5"), true),
            (range(Eq, "2"), range(Lt, "3"), true),
            (range(Eq, "3"), range(Lt, "3"), false),
            (range(Eq, "3"), range(Eq, "3"), true),
            (range(Eq, "3"), range(Eq, "4"), false),
            (range(Lt, "5"), range(Gt, "3"), true),
            (range(Lt, "3"), range(Ge, "3"), false),
            (range(Le, "3"), range(Ge, "3"), true),
            (range(Le, "3"), range(Gt, "3"), false),
            (range(Ge, "4"), range(Le, "3"), false),
            (range(Lt, "3"), range(Lt, "3"), true),
            (range(Gt, "3"), range(Ge, "3"), true),
        ];

        for (a, b, expected) in cases {
            assert_eq!(a.intersects(&b), expected, "{} vs {}", a, b);
            assert_eq!(b.intersects(&a), expected, "{} vs {}", b, a);
        }
    }

    #[test]
    fn parse_chain() -> Result<()> {
        let r = PackageRelation::parse("a ge 1.0 | b | c lt 2", VersionScheme::Deb)?;

        let names = r.iter().map(|x| x.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(r.version.op(), RangeOp::Ge);
        assert_eq!(format!("{}", r), "a (ge 1.0) | b | c (lt 2)");

        assert!(PackageRelation::parse("a foo 1", VersionScheme::Deb).is_err());
        assert!(PackageRelation::parse("a ge", VersionScheme::Deb).is_err());

        let r = PackageRelation::parse("libc6 (>= 2.17) | libc-dummy", VersionScheme::Deb)?;
        assert_eq!(r.name, "libc6");
        assert_eq!(r.version.op(), RangeOp::Ge);
        assert_eq!(r.alternative.as_ref().map(|a| a.name.as_str()), Some("libc-dummy"));

        Ok(())
    }

    #[test]
    fn from_args_builds_chain() -> Result<()> {
        let r = PackageRelation::from_args([
            ("x", range(RangeOp::Gt, "1")),
            ("y", VersionRange::any()),
        ])?;

        assert_eq!(r.name, "x");
        assert_eq!(r.alternative.as_ref().map(|a| a.name.as_str()), Some("y"));
        assert!(r.alternative.as_ref().unwrap().alternative.is_none());

        // Equality ignores alternatives.
        assert_eq!(r, PackageRelation::new("x", range(RangeOp::Gt, "1")));

        Ok(())
    }
}
