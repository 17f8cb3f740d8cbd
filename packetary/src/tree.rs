// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Dependency resolution over a set of packages.

[PackagesTree] is an [Index] that also remembers which packages the
repository family marks as mandatory. It answers two questions: which
requirements of its packages cannot be satisfied, and what is the smallest
subset of its packages satisfying a set of requirements.
*/

use {
    crate::{
        index::Index,
        package::Package,
        relation::PackageRelation,
        version::PackageVersion,
    },
    log::warn,
    std::{collections::HashSet, ops::Deref, sync::Arc},
};

/// An [Index] with dependency resolution.
#[derive(Clone, Debug, Default)]
pub struct PackagesTree {
    index: Index,
    mandatory: Vec<Arc<Package>>,
}

impl Deref for PackagesTree {
    type Target = Index;

    fn deref(&self) -> &Self::Target {
        &self.index
    }
}

impl PackagesTree {
    /// Add a package, recording it as mandatory if flagged so.
    pub fn add(&mut self, package: Arc<Package>) {
        if package.mandatory {
            self.mandatory.push(package.clone());
        }

        self.index.add(package);
    }

    /// Packages that must always be part of a subset.
    pub fn mandatory_packages(&self) -> &[Arc<Package>] {
        &self.mandatory
    }

    /// Requirements of tree packages that nothing satisfies.
    ///
    /// A requirement is satisfied when any of its alternatives can be found in
    /// the tree or, if given, in `base`. Each unresolved chain is reported
    /// once.
    pub fn get_unresolved_dependencies(&self, base: Option<&Index>) -> Vec<PackageRelation> {
        let mut seen = HashSet::new();
        let mut unresolved = vec![];

        for package in self.index.iter() {
            for requirement in &package.requires {
                if self.is_satisfied(requirement) {
                    continue;
                }

                if let Some(base) = base {
                    if requirement
                        .iter()
                        .any(|r| base.find(&r.name, &r.version).is_some())
                    {
                        continue;
                    }
                }

                if seen.insert(requirement.to_string()) {
                    unresolved.push(requirement.clone());
                }
            }
        }

        unresolved
    }

    fn is_satisfied(&self, requirement: &PackageRelation) -> bool {
        requirement
            .iter()
            .any(|r| self.index.find(&r.name, &r.version).is_some())
    }

    /// Compute the smallest subset of this tree satisfying `requirements`.
    ///
    /// Mandatory packages and everything they need are always included.
    /// Requirements satisfied by `main` are not pulled from the tree.
    /// Packages are returned in the order they were resolved.
    pub fn get_minimal_subset(
        &self,
        main: Option<&Index>,
        requirements: &[PackageRelation],
    ) -> Vec<Arc<Package>> {
        let (resolved, unresolved) = self.resolve_subset(main, requirements);

        for requirement in unresolved {
            warn!("unresolved dependency: {}", requirement);
        }

        resolved
    }

    /// The closure of [Self::get_minimal_subset] along with the requirement
    /// chains it could not satisfy, each reported once.
    fn resolve_subset(
        &self,
        main: Option<&Index>,
        requirements: &[PackageRelation],
    ) -> (Vec<Arc<Package>>, Vec<PackageRelation>) {
        let mut resolved: Vec<Arc<Package>> = vec![];
        let mut keys: HashSet<(String, PackageVersion)> = HashSet::new();
        let mut stack: Vec<PackageRelation> = vec![];
        let mut seen_unresolved: HashSet<String> = HashSet::new();
        let mut unresolved: Vec<PackageRelation> = vec![];

        for package in &self.mandatory {
            if keys.insert(package.key()) {
                resolved.push(package.clone());
                stack.extend(package.requires.iter().rev().cloned());
            }
        }

        stack.extend(requirements.iter().rev().cloned());

        while let Some(requirement) = stack.pop() {
            let mut satisfied = false;

            for alternative in requirement.iter() {
                if let Some(main) = main {
                    if main.find(&alternative.name, &alternative.version).is_some() {
                        satisfied = true;
                        break;
                    }
                }

                let candidates = self.index.find_all(&alternative.name, &alternative.version);
                if candidates.is_empty() {
                    continue;
                }

                for candidate in candidates {
                    if keys.insert(candidate.key()) {
                        stack.extend(candidate.requires.iter().rev().cloned());
                        resolved.push(candidate);
                    }
                }

                satisfied = true;
                break;
            }

            if !satisfied && seen_unresolved.insert(requirement.to_string()) {
                unresolved.push(requirement);
            }
        }

        (resolved, unresolved)
    }
}

impl FromIterator<Arc<Package>> for PackagesTree {
    fn from_iter<T: IntoIterator<Item = Arc<Package>>>(iter: T) -> Self {
        let mut tree = Self::default();
        for package in iter {
            tree.add(package);
        }

        tree
    }
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

    fn requirement(s: &str) -> PackageRelation {
        PackageRelation::parse(s, VersionScheme::Rpm).unwrap()
    }

    fn names(packages: &[Arc<Package>]) -> Vec<String> {
        packages
            .iter()
            .map(|p| format!("{}/{}", p.name, p.version))
            .collect()
    }

    fn upstream() -> PackagesTree {
        let repo = repository("upstream");

        [
            package(&repo, "a", "1", &["b ge 1"], &[], &[]),
            package(&repo, "b", "1", &[], &[], &[]),
            package(&repo, "c", "1", &[], &[], &[]),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn closure_pulls_dependencies() {
        let tree = upstream();

        let subset = tree.get_minimal_subset(None, &[requirement("a")]);
        assert_eq!(names(&subset), vec!["a/0-1-", "b/0-1-"]);

        // Repeated runs over the same inputs agree.
        let again = tree.get_minimal_subset(None, &[requirement("a")]);
        assert_eq!(subset, again);
    }

    #[test]
    fn main_index_shadows_tree() {
        let repo = repository("upstream");
        let tree: PackagesTree = [
            package(&repo, "a", "1", &["b ge 1"], &[], &[]),
            package(&repo, "b", "1", &[], &[], &[]),
        ]
        .into_iter()
        .collect();

        let mut main = Index::default();
        main.add(package(&repository("main"), "b", "2", &[], &[], &[]));

        let subset = tree.get_minimal_subset(Some(&main), &[requirement("a")]);
        assert_eq!(names(&subset), vec!["a/0-1-"]);
    }

    #[test]
    fn obsoletes_routing() {
        let repo = repository("upstream");
        let tree: PackagesTree = [package(&repo, "new", "2", &[], &["old le 1"], &[])]
            .into_iter()
            .collect();

        let subset = tree.get_minimal_subset(None, &[requirement("old")]);
        assert_eq!(names(&subset), vec!["new/0-2-"]);
    }

    #[test]
    fn alternatives_stop_at_first_match() {
        let repo = repository("upstream");
        let tree: PackagesTree = [
            package(&repo, "x", "1", &["missing | y | z"], &[], &[]),
            package(&repo, "y", "1", &[], &[], &[]),
            package(&repo, "z", "1", &[], &[], &[]),
        ]
        .into_iter()
        .collect();

        let subset = tree.get_minimal_subset(None, &[requirement("x")]);
        assert_eq!(names(&subset), vec!["x/0-1-", "y/0-1-"]);
    }

    #[test]
    fn mandatory_always_included() {
        let repo = repository("upstream");
        let mut base = (*package(&repo, "base", "1", &["c"], &[], &[])).clone();
        base.mandatory = true;

        let mut tree = upstream();
        tree.add(Arc::new(base));

        assert_eq!(tree.mandatory_packages().len(), 1);

        let subset = tree.get_minimal_subset(None, &[]);
        assert_eq!(names(&subset), vec!["base/0-1-", "c/0-1-"]);

        let subset = tree.get_minimal_subset(None, &[requirement("a")]);
        assert_eq!(
            names(&subset),
            vec!["base/0-1-", "a/0-1-", "b/0-1-", "c/0-1-"]
        );
    }

    #[test]
    fn missing_seed_gives_empty_set() {
        let tree = upstream();
        let subset = tree.get_minimal_subset(None, &[requirement("nothing ge 1")]);
        assert!(subset.is_empty());

        let (subset, unresolved) = tree.resolve_subset(
            None,
            &[requirement("nothing ge 1"), requirement("nothing ge 1")],
        );
        assert!(subset.is_empty());
        assert_eq!(unresolved, vec![requirement("nothing ge 1")]);
    }

    #[test]
    fn unresolved_dependencies() {
        let repo = repository("upstream");
        let tree: PackagesTree = [
            package(&repo, "a", "1", &["b ge 2", "c", "d | e"], &[], &[]),
            package(&repo, "f", "1", &["b ge 2"], &[], &[]),
            package(&repo, "b", "1", &[], &[], &[]),
            package(&repo, "e", "1", &[], &[], &[]),
        ]
        .into_iter()
        .collect();

        let unresolved = tree
            .get_unresolved_dependencies(None)
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>();
        assert_eq!(unresolved, vec!["b (ge 0-2-)", "c"]);

        let mut base = Index::default();
        base.add(package(&repository("base"), "c", "5", &[], &[], &[]));

        let unresolved = tree.get_unresolved_dependencies(Some(&base));
        assert_eq!(unresolved, vec![requirement("b ge 2")]);
    }
}
