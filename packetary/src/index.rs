// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Searchable index of packages.

An [Index] resolves a `(name, version range)` query against package names
first, then against what packages declare they obsolete, then against what
they provide.
*/

use {
    crate::{
        package::Package,
        relation::{PackageRelation, RangeOp, VersionRange},
        version::PackageVersion,
    },
    std::{
        collections::BTreeMap,
        ops::Bound::{Excluded, Unbounded},
        sync::Arc,
    },
};

type OwnerKey = (String, PackageVersion);

/// Declarations of one name, keyed by the declaring package.
type Declarations = BTreeMap<OwnerKey, (Arc<Package>, PackageRelation)>;

/// Packages indexed by name and version.
#[derive(Clone, Debug, Default)]
pub struct Index {
    packages: BTreeMap<String, BTreeMap<PackageVersion, Arc<Package>>>,
    provides: BTreeMap<String, Declarations>,
    obsoletes: BTreeMap<String, Declarations>,
}

impl Index {
    /// Add a package.
    ///
    /// A package with the same name and version replaces the previous one.
    pub fn add(&mut self, package: Arc<Package>) {
        let key = package.key();

        for relation in &package.provides {
            self.provides
                .entry(relation.name.clone())
                .or_default()
                .insert(key.clone(), (package.clone(), relation.clone()));
        }

        for relation in &package.obsoletes {
            self.obsoletes
                .entry(relation.name.clone())
                .or_default()
                .insert(key.clone(), (package.clone(), relation.clone()));
        }

        self.packages
            .entry(package.name.clone())
            .or_default()
            .insert(package.version.clone(), package);
    }

    /// Number of packages.
    pub fn len(&self) -> usize {
        self.packages.values().map(|versions| versions.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Iterate over packages, ordered by name then version.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Package>> + '_ {
        self.packages.values().flat_map(|versions| versions.values())
    }

    /// Find the best match for a query.
    ///
    /// This is the highest satisfying version by name, or else the highest
    /// owner of a matching obsoletes or provides declaration.
    pub fn find(&self, name: &str, range: &VersionRange) -> Option<Arc<Package>> {
        self.find_all(name, range).pop()
    }

    /// Find every package matching a query, in ascending version order.
    ///
    /// Declarations in `obsoletes` and `provides` are only consulted when no
    /// package with that name satisfies the range.
    pub fn find_all(&self, name: &str, range: &VersionRange) -> Vec<Arc<Package>> {
        if let Some(versions) = self.packages.get(name) {
            let candidates = find_versions(versions, range);
            if !candidates.is_empty() {
                return candidates;
            }
        }

        for declarations in [&self.obsoletes, &self.provides] {
            if let Some(owner) = declarations
                .get(name)
                .and_then(|declared| resolve_declaration(declared, range))
            {
                return vec![owner];
            }
        }

        vec![]
    }
}

fn find_versions(
    versions: &BTreeMap<PackageVersion, Arc<Package>>,
    range: &VersionRange,
) -> Vec<Arc<Package>> {
    let edge = match range.edge() {
        Some(edge) => edge,
        None => return versions.values().cloned().collect(),
    };

    let selected: Box<dyn Iterator<Item = (&PackageVersion, &Arc<Package>)>> = match range.op()
    {
        RangeOp::Any => Box::new(versions.iter()),
        RangeOp::Eq => Box::new(versions.get_key_value(edge).into_iter()),
        RangeOp::Lt => Box::new(versions.range::<PackageVersion, _>(..edge)),
        RangeOp::Le => Box::new(versions.range::<PackageVersion, _>(..=edge)),
        RangeOp::Gt => Box::new(versions.range::<PackageVersion, _>((Excluded(edge), Unbounded))),
        RangeOp::Ge => Box::new(versions.range::<PackageVersion, _>(edge..)),
    };

    selected.map(|(_, p)| p.clone()).collect()
}

/// Pick the highest owner whose declared range intersects the query.
fn resolve_declaration(declared: &Declarations, range: &VersionRange) -> Option<Arc<Package>> {
    declared
        .values()
        .rev()
        .find(|(_, relation)| relation.version.intersects(range))
        .map(|(package, _)| package.clone())
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            package::test::{package, repository},
            version::VersionScheme,
        },
    };

    fn range(op: RangeOp, edge: &str) -> VersionRange {
        VersionRange::new(op, VersionScheme::Rpm.parse(edge).unwrap())
    }

    fn versions(packages: Vec<Arc<Package>>) -> Vec<String> {
        packages
            .iter()
            .map(|p| format!("{}-{}", p.name, p.version))
            .collect()
    }

    fn sample() -> Index {
        let repo = repository("os");
        let mut index = Index::default();

        for v in ["1", "2", "3"] {
            index.add(package(&repo, "a", v, &[], &[], &[]));
        }
        index.add(package(&repo, "new", "5", &[], &["old le 2"], &[]));
        index.add(package(&repo, "newer", "6", &[], &["old le 1"], &[]));
        index.add(package(&repo, "impl", "1", &[], &[], &["virtual eq 2"]));

        index
    }

    #[test]
    fn add_then_find_exact() {
        let index = sample();

        for p in index.iter().cloned().collect::<Vec<_>>() {
            let found = index
                .find(&p.name, &VersionRange::new(RangeOp::Eq, p.version.clone()))
                .unwrap();
            assert!(Arc::ptr_eq(&found, &p));
        }

        assert_eq!(index.len(), 6);
    }

    #[test]
    fn direction_table() {
        let index = sample();

        assert_eq!(
            versions(index.find_all("a", &VersionRange::any())),
            vec!["a-0-1-", "a-0-2-", "a-0-3-"]
        );
        assert_eq!(
            versions(index.find_all("a", &range(RangeOp::Lt, "2"))),
            vec!["a-0-1-"]
        );
        assert_eq!(
            versions(index.find_all("a", &range(RangeOp::Le, "2"))),
            vec!["a-0-1-", "a-0-2-"]
        );
        assert_eq!(
            versions(index.find_all("a", &range(RangeOp::Gt, "2"))),
            vec!["a-0-3-"]
        );
        assert_eq!(
            versions(index.find_all("a", &range(RangeOp::Ge, "2"))),
            vec!["a-0-2-", "a-0-3-"]
        );
        assert!(index.find_all("a", &range(RangeOp::Eq, "7")).is_empty());

        assert_eq!(
            index.find("a", &range(RangeOp::Le, "2")).unwrap().name,
            "a"
        );
        assert_eq!(
            format!("{}", index.find("a", &VersionRange::any()).unwrap().version),
            "0-3-"
        );
    }

    #[test]
    fn obsoletes_then_provides() {
        let index = sample();

        // Highest owner whose declaration intersects wins.
        assert_eq!(
            index.find("old", &VersionRange::any()).unwrap().name,
            "newer"
        );
        assert_eq!(
            index.find("old", &range(RangeOp::Eq, "2")).unwrap().name,
            "new"
        );
        assert!(index.find("old", &range(RangeOp::Ge, "3")).is_none());

        assert_eq!(
            index.find("virtual", &range(RangeOp::Ge, "1")).unwrap().name,
            "impl"
        );
        assert!(index.find("virtual", &range(RangeOp::Gt, "2")).is_none());
        assert!(index.find("missing", &VersionRange::any()).is_none());
    }
}
