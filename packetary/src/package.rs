// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Repositories and the packages they hold. */

use {
    crate::{
        error::{PacketaryError, Result},
        relation::PackageRelation,
        version::PackageVersion,
    },
    std::{
        cmp::Ordering,
        fmt::{Display, Formatter},
        hash::{Hash, Hasher},
        path::PathBuf,
        sync::Arc,
    },
    url::Url,
};

/// Identifies a repository within its upstream.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum RepositoryName {
    /// A repository addressed by a single path.
    Flat(String),

    /// A Debian `(suite, component)` pair.
    Component { suite: String, component: String },
}

impl Display for RepositoryName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flat(name) => f.write_str(name),
            Self::Component { suite, component } => write!(f, "{}/{}", suite, component),
        }
    }
}

/// A metadata + payload endpoint for one architecture.
///
/// Repositories are shared through [Arc] and compared by identity, so a clone
/// is a distinct repository.
#[derive(Clone, Debug)]
pub struct Repository {
    pub name: RepositoryName,

    /// Base URL, always ending with `/`.
    pub url: String,

    /// One of `x86_64`, `i386` or `source`.
    pub architecture: String,

    /// Free-form origin, written as `Origin`/`Label` by the Debian driver.
    pub origin: String,
}

impl Repository {
    /// Construct an instance, normalizing the URL to end with `/`.
    pub fn new(
        name: RepositoryName,
        url: impl ToString,
        architecture: impl ToString,
        origin: impl ToString,
    ) -> Self {
        Self {
            name,
            url: normalize_repository_url(&url.to_string()),
            architecture: architecture.to_string(),
            origin: origin.to_string(),
        }
    }

    /// Resolve the local filesystem directory of this repository.
    ///
    /// Only `file://` URLs and absolute paths have one.
    pub fn local_path(&self) -> Result<PathBuf> {
        local_path_from_url(&self.url)
    }
}

impl Display for Repository {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.url, self.architecture)
    }
}

/// Ensure a repository URL has a trailing `/`.
pub fn normalize_repository_url(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}

/// Convert a `file://` URL or absolute path into a filesystem path.
pub fn local_path_from_url(url: &str) -> Result<PathBuf> {
    if url.starts_with('/') {
        return Ok(PathBuf::from(url));
    }

    let parsed = Url::parse(url)?;
    if parsed.scheme() != "file" {
        return Err(PacketaryError::InvalidUrl(format!(
            "{} is not a local repository",
            url
        )));
    }

    parsed
        .to_file_path()
        .map_err(|_| PacketaryError::InvalidUrl(url.to_string()))
}

/// Content digests of a package file. Any of them may be unknown.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct FileChecksum {
    pub md5: Option<String>,
    pub sha1: Option<String>,
    pub sha256: Option<String>,
}

impl Display for FileChecksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let value = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());

        write!(
            f,
            "md5={} sha1={} sha256={}",
            value(&self.md5),
            value(&self.sha1),
            value(&self.sha256)
        )
    }
}

/// A package as described by a repository index.
///
/// Identity, ordering and hashing only consider `(name, version)`.
#[derive(Clone, Debug)]
pub struct Package {
    pub repository: Arc<Repository>,
    pub name: String,
    pub version: PackageVersion,

    /// Path of the package file, relative to the repository URL.
    pub filename: String,

    /// Size in bytes. `-1` when unknown.
    pub filesize: i64,

    pub checksum: FileChecksum,

    /// Whether the family convention requires this package to always be present.
    pub mandatory: bool,

    pub requires: Vec<PackageRelation>,
    pub provides: Vec<PackageRelation>,
    pub obsoletes: Vec<PackageRelation>,
}

impl Package {
    /// The absolute URL of the package file.
    pub fn url(&self) -> String {
        format!(
            "{}{}",
            self.repository.url,
            self.filename.trim_start_matches('/')
        )
    }

    /// Key identifying this package within a repository.
    pub fn key(&self) -> (String, PackageVersion) {
        (self.name.clone(), self.version.clone())
    }
}

impl PartialEq for Package {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.version == other.version
    }
}

impl Eq for Package {}

impl Hash for Package {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.version.hash(state);
    }
}

impl PartialOrd for Package {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Package {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.version.cmp(&other.version))
    }
}

impl Display for Package {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}

#[cfg(test)]
pub(crate) mod test {
    use {
        super::*,
        crate::{relation::VersionRange, version::VersionScheme},
    };

    pub(crate) fn repository(name: &str) -> Arc<Repository> {
        Arc::new(Repository::new(
            RepositoryName::Flat(name.to_string()),
            format!("file:///tmp/{}", name),
            "x86_64",
            "test",
        ))
    }

    /// Build a package; relations use the `NAME [OP VERSION]` text form.
    pub(crate) fn package(
        repository: &Arc<Repository>,
        name: &str,
        version: &str,
        requires: &[&str],
        obsoletes: &[&str],
        provides: &[&str],
    ) -> Arc<Package> {
        let relations = |values: &[&str]| {
            values
                .iter()
                .map(|s| PackageRelation::parse(s, VersionScheme::Rpm).unwrap())
                .collect::<Vec<_>>()
        };

        Arc::new(Package {
            repository: repository.clone(),
            name: name.to_string(),
            version: VersionScheme::Rpm.parse(version).unwrap(),
            filename: format!("Packages/{}-{}.rpm", name, version),
            filesize: 1,
            checksum: FileChecksum::default(),
            mandatory: false,
            requires: relations(requires),
            provides: relations(provides),
            obsoletes: relations(obsoletes),
        })
    }

    #[test]
    fn url_resolution() {
        let repo = repository("os");
        assert_eq!(repo.url, "file:///tmp/os/");

        let p = package(&repo, "a", "1", &[], &[], &[]);
        assert_eq!(p.url(), "file:///tmp/os/Packages/a-1.rpm");
        assert_eq!(
            repo.local_path().unwrap(),
            std::path::PathBuf::from("/tmp/os/")
        );

        assert!(local_path_from_url("http://example.com/x").is_err());
        assert_eq!(
            local_path_from_url("/srv/mirror").unwrap(),
            std::path::PathBuf::from("/srv/mirror")
        );
    }

    #[test]
    fn identity_is_name_and_version() {
        let a = package(&repository("one"), "a", "1", &["b"], &[], &[]);
        let b = package(&repository("two"), "a", "1", &[], &[], &[]);
        let c = package(&repository("one"), "a", "2", &[], &[], &[]);

        assert_eq!(a, b);
        assert!(a < c);
        assert_eq!(
            a.requires,
            vec![PackageRelation::new("b", VersionRange::any())]
        );
    }
}
