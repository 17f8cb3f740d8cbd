// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! High level operations over sets of repositories.

[RepositoryApi] answers the questions a mirror operator asks: what packages
do these repositories hold, which dependencies do they leave unresolved, and
copy them (or the subset needed to satisfy some requirements) to a local
directory.
*/

use {
    crate::{
        config::Configuration,
        controller::{CopyObserver, RepositoryController},
        error::Result,
        index::Index,
        package::{Package, Repository},
        relation::PackageRelation,
        tree::PackagesTree,
    },
    log::info,
    std::{
        path::Path,
        sync::{Arc, Mutex},
    },
};

/// What a subset of repositories must satisfy.
#[derive(Clone, Debug, Default)]
pub struct Requirements {
    /// URLs of repositories whose packages are already available.
    ///
    /// Their packages are not copied, but their requirements are.
    pub repositories: Vec<String>,

    /// Explicitly requested packages.
    pub packages: Vec<PackageRelation>,
}

/// Outcome of a copy.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CopyStatistics {
    /// Packages that had to be downloaded.
    pub copied: usize,

    /// Packages that are part of the copy.
    pub total: usize,
}

impl CopyStatistics {
    /// Account for a package whose download wrote `bytes`.
    pub fn on_package_copied(&mut self, bytes: u64) {
        self.total += 1;
        if bytes > 0 {
            self.copied += 1;
        }
    }
}

/// Progress notifications of [RepositoryApi::clone_repositories].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CopyEvent {
    /// Downloads are about to start. Carries the total size of the selected
    /// packages, as far as the index knows it.
    Begin(u64),

    /// A package download finished after writing this many bytes.
    Progress(u64),

    /// Every download finished.
    Finished,
}

/// Receives [CopyEvent].
pub type ProgressCallback = Arc<dyn Fn(CopyEvent) + Send + Sync>;

/// Options of [RepositoryApi::clone_repositories].
#[derive(Clone, Debug)]
pub struct CloneOptions {
    /// Keep packages the destination already holds.
    pub keep_existing: bool,

    pub include_source: bool,
    pub include_locale: bool,
}

impl Default for CloneOptions {
    fn default() -> Self {
        Self {
            keep_existing: true,
            include_source: false,
            include_locale: false,
        }
    }
}

pub struct RepositoryApi {
    controller: RepositoryController,
}

impl RepositoryApi {
    pub fn new(controller: RepositoryController) -> Self {
        Self { controller }
    }

    /// Construct an instance for a driver and architecture.
    pub fn create(config: &Configuration, driver_name: &str, architecture: &str) -> Result<Self> {
        Ok(Self::new(RepositoryController::load(
            config,
            driver_name,
            architecture,
        )?))
    }

    pub fn controller(&self) -> &RepositoryController {
        &self.controller
    }

    /// Parse a relation with the version syntax of the driver.
    pub fn parse_relation(&self, s: &str) -> Result<PackageRelation> {
        PackageRelation::parse(s, self.controller.driver().version_scheme())
    }

    async fn load_tree(&self, repositories: &[Arc<Repository>]) -> Result<PackagesTree> {
        let mut tree = PackagesTree::default();
        self.controller
            .load_packages(repositories, &mut |p| tree.add(p))
            .await?;

        Ok(tree)
    }

    async fn load_index(&self, urls: &[String]) -> Result<Index> {
        let repositories = self.controller.load_repositories(urls).await?;

        let mut index = Index::default();
        self.controller
            .load_packages(&repositories, &mut |p| index.add(p))
            .await?;

        Ok(index)
    }

    /// Select packages of `repositories`.
    ///
    /// Without requirements every package is selected, in index order.
    async fn select_packages(
        &self,
        repositories: &[Arc<Repository>],
        requirements: Option<&Requirements>,
    ) -> Result<Vec<Arc<Package>>> {
        let requirements = match requirements {
            Some(requirements) => requirements,
            None => {
                let mut packages = vec![];
                self.controller
                    .load_packages(repositories, &mut |p| packages.push(p))
                    .await?;

                return Ok(packages);
            }
        };

        let tree = self.load_tree(repositories).await?;

        let main = if requirements.repositories.is_empty() {
            None
        } else {
            Some(self.load_index(&requirements.repositories).await?)
        };

        let mut seeds = vec![];
        if let Some(main) = &main {
            for package in main.iter() {
                seeds.extend(package.requires.iter().cloned());
            }
        }
        seeds.extend(requirements.packages.iter().cloned());

        Ok(tree.get_minimal_subset(main.as_ref(), &seeds))
    }

    /// List packages of the repositories at `origin`.
    ///
    /// With `requirements`, only the minimal subset satisfying them is
    /// returned.
    pub async fn get_packages(
        &self,
        origin: &[String],
        requirements: Option<&Requirements>,
    ) -> Result<Vec<Arc<Package>>> {
        let repositories = self.controller.load_repositories(origin).await?;

        self.select_packages(&repositories, requirements).await
    }

    /// Copy the repositories at `origin` below `destination`.
    ///
    /// `progress` is notified as package downloads complete.
    pub async fn clone_repositories(
        &self,
        origin: &[String],
        destination: &Path,
        requirements: Option<&Requirements>,
        options: &CloneOptions,
        progress: Option<ProgressCallback>,
    ) -> Result<CopyStatistics> {
        let repositories = self.controller.load_repositories(origin).await?;
        let packages = self.select_packages(&repositories, requirements).await?;

        let mirrors = self
            .controller
            .fork_repositories(
                &repositories,
                destination,
                options.include_source,
                options.include_locale,
            )
            .await?;

        if let Some(progress) = &progress {
            progress(CopyEvent::Begin(
                packages.iter().map(|p| p.filesize.max(0) as u64).sum(),
            ));
        }

        let statistics = Arc::new(Mutex::new(CopyStatistics::default()));
        let observer: CopyObserver = {
            let statistics = statistics.clone();
            let progress = progress.clone();
            Arc::new(move |bytes| {
                if let Ok(mut statistics) = statistics.lock() {
                    statistics.on_package_copied(bytes);
                }
                if let Some(progress) = &progress {
                    progress(CopyEvent::Progress(bytes));
                }
            })
        };

        for (original, mirror) in &mirrors {
            let group = packages
                .iter()
                .filter(|p| Arc::ptr_eq(&p.repository, original))
                .cloned()
                .collect::<Vec<_>>();

            self.controller
                .copy_packages(mirror, &group, options.keep_existing, Some(observer.clone()))
                .await?;
        }

        if let Some(progress) = &progress {
            progress(CopyEvent::Finished);
        }

        let statistics = statistics.lock().map(|s| *s).unwrap_or_default();

        info!(
            "copied {} of {} packages to {}",
            statistics.copied,
            statistics.total,
            destination.display()
        );

        Ok(statistics)
    }

    /// Requirements of the packages at `origin` that nothing satisfies.
    ///
    /// Packages of the repositories at `main` count as available.
    pub async fn get_unresolved_dependencies(
        &self,
        origin: &[String],
        main: &[String],
    ) -> Result<Vec<PackageRelation>> {
        let repositories = self.controller.load_repositories(origin).await?;
        let tree = self.load_tree(&repositories).await?;

        let base = if main.is_empty() {
            None
        } else {
            Some(self.load_index(main).await?)
        };

        Ok(tree.get_unresolved_dependencies(base.as_ref()))
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{controller::test::deb_repository, version::VersionScheme},
    };

    fn api() -> Result<RepositoryApi> {
        RepositoryApi::create(&Configuration::default(), "deb", "x86_64")
    }

    fn origin(repository: &Repository) -> Vec<String> {
        vec![format!("{} stable main", repository.url)]
    }

    #[test]
    fn statistics() {
        let mut statistics = CopyStatistics::default();
        statistics.on_package_copied(10);
        statistics.on_package_copied(0);

        assert_eq!(statistics, CopyStatistics { copied: 1, total: 2 });
    }

    #[tokio::test]
    async fn empty_upstream() -> Result<()> {
        let td = tempfile::tempdir()?;
        let upstream = deb_repository(&td.path().join("upstream"), &[]).await?;

        let statistics = api()?
            .clone_repositories(
                &origin(&upstream),
                &td.path().join("mirror"),
                None,
                &CloneOptions::default(),
                None,
            )
            .await?;

        assert_eq!(statistics, CopyStatistics { copied: 0, total: 0 });

        Ok(())
    }

    #[tokio::test]
    async fn minimal_clone() -> Result<()> {
        let td = tempfile::tempdir()?;
        let upstream = deb_repository(
            &td.path().join("upstream"),
            &[("a", "1", "b (>= 1)"), ("b", "1", ""), ("c", "1", "")],
        )
        .await?;

        let api = api()?;
        let requirements = Requirements {
            repositories: vec![],
            packages: vec![api.parse_relation("a")?],
        };

        let mut selected = api
            .get_packages(&origin(&upstream), Some(&requirements))
            .await?
            .iter()
            .map(|p| p.name.clone())
            .collect::<Vec<_>>();
        selected.sort();
        assert_eq!(selected, vec!["a", "b"]);

        let events = Arc::new(Mutex::new(vec![]));
        let progress: ProgressCallback = {
            let events = events.clone();
            Arc::new(move |event| events.lock().unwrap().push(event))
        };

        let destination = td.path().join("mirror");
        let statistics = api
            .clone_repositories(
                &origin(&upstream),
                &destination,
                Some(&requirements),
                &CloneOptions::default(),
                Some(progress),
            )
            .await?;
        assert_eq!(statistics, CopyStatistics { copied: 2, total: 2 });

        let events = events.lock().unwrap().clone();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], CopyEvent::Begin(total) if total > 0));
        assert_eq!(events[3], CopyEvent::Finished);
        assert!(!destination.join("pool/main/c_1_amd64.deb").exists());

        // A second run finds everything in place.
        let statistics = api
            .clone_repositories(
                &origin(&upstream),
                &destination,
                Some(&requirements),
                &CloneOptions::default(),
                None,
            )
            .await?;
        assert_eq!(statistics, CopyStatistics { copied: 0, total: 2 });

        let mut mirrored = api
            .get_packages(&[format!("{} stable main", destination.display())], None)
            .await?
            .iter()
            .map(|p| p.name.clone())
            .collect::<Vec<_>>();
        mirrored.sort();
        assert_eq!(mirrored, vec!["a", "b"]);

        Ok(())
    }

    #[tokio::test]
    async fn identical_origin_copies_nothing() -> Result<()> {
        let td = tempfile::tempdir()?;
        let upstream = deb_repository(
            &td.path().join("upstream"),
            &[("a", "1", ""), ("b", "1", "a")],
        )
        .await?;

        let api = api()?;
        let destination = td.path().join("mirror");

        let first = api
            .clone_repositories(
                &origin(&upstream),
                &destination,
                None,
                &CloneOptions::default(),
                None,
            )
            .await?;
        assert_eq!(first, CopyStatistics { copied: 2, total: 2 });

        let bytes = Arc::new(Mutex::new(0u64));
        let progress: ProgressCallback = {
            let bytes = bytes.clone();
            Arc::new(move |event| {
                if let CopyEvent::Progress(written) = event {
                    *bytes.lock().unwrap() += written;
                }
            })
        };

        let second = api
            .clone_repositories(
                &origin(&upstream),
                &destination,
                None,
                &CloneOptions::default(),
                Some(progress),
            )
            .await?;
        assert_eq!(second, CopyStatistics { copied: 0, total: 2 });
        assert_eq!(*bytes.lock().unwrap(), 0);

        let mirrored = api
            .get_packages(&[format!("{} stable main", destination.display())], None)
            .await?;
        assert_eq!(mirrored.len(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn unresolved() -> Result<()> {
        let td = tempfile::tempdir()?;
        let upstream = deb_repository(
            &td.path().join("upstream"),
            &[("a", "1", "b (>= 1), libc6 | libc-dummy"), ("b", "1", "")],
        )
        .await?;
        let base = deb_repository(&td.path().join("base"), &[("libc-dummy", "2", "")]).await?;

        let api = api()?;

        let unresolved = api
            .get_unresolved_dependencies(&origin(&upstream), &[])
            .await?;
        assert_eq!(
            unresolved,
            vec![PackageRelation::parse("libc6 | libc-dummy", VersionScheme::Deb)?]
        );

        let unresolved = api
            .get_unresolved_dependencies(&origin(&upstream), &origin(&base))
            .await?;
        assert!(unresolved.is_empty());

        Ok(())
    }
}
