// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Coordination of a driver, the transport and concurrent sections. */

use {
    crate::{
        config::Configuration,
        drivers::{driver_for_name, PackageConsumer, RepositoryDriver},
        error::{PacketaryError, Result},
        package::{Package, Repository},
        section::AsynchronousSection,
        transport::Transport,
    },
    log::{debug, info},
    std::{
        collections::HashSet,
        path::{Path, PathBuf},
        sync::Arc,
    },
};

/// Receives the number of bytes written for each copied package.
pub type CopyObserver = Arc<dyn Fn(u64) + Send + Sync>;

/// Runs repository operations of one family for one architecture.
#[derive(Clone)]
pub struct RepositoryController {
    driver: Arc<dyn RepositoryDriver>,
    transport: Transport,
    architecture: String,
    threads_num: usize,
    ignore_errors_num: usize,
}

impl RepositoryController {
    pub fn new(
        driver: Arc<dyn RepositoryDriver>,
        transport: Transport,
        config: &Configuration,
        architecture: impl ToString,
    ) -> Self {
        Self {
            driver,
            transport,
            architecture: architecture.to_string(),
            threads_num: config.threads_num,
            ignore_errors_num: config.ignore_errors_num,
        }
    }

    /// Construct an instance for the driver registered as `driver_name`.
    pub fn load(config: &Configuration, driver_name: &str, architecture: &str) -> Result<Self> {
        Ok(Self::new(
            driver_for_name(driver_name)?,
            Transport::new(config)?,
            config,
            architecture,
        ))
    }

    pub fn driver(&self) -> &Arc<dyn RepositoryDriver> {
        &self.driver
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Open the repositories designated by `urls`, in order.
    pub async fn load_repositories(&self, urls: &[String]) -> Result<Vec<Arc<Repository>>> {
        let mut repositories = vec![];

        for location in self.driver.parse_urls(urls)? {
            repositories.push(Arc::new(
                self.driver
                    .get_repository(&self.transport, &location, &self.architecture)
                    .await?,
            ));
        }

        Ok(repositories)
    }

    /// Stream the packages of every repository to `consumer`.
    pub async fn load_packages(
        &self,
        repositories: &[Arc<Repository>],
        consumer: &mut PackageConsumer<'_>,
    ) -> Result<()> {
        for repository in repositories {
            self.driver
                .get_packages(&self.transport, repository, consumer)
                .await?;
        }

        Ok(())
    }

    /// Create empty local copies of `repositories` below `destination`.
    ///
    /// Returns `(original, clone)` pairs. Forks run concurrently and a failed
    /// fork does not prevent the others.
    pub async fn fork_repositories(
        &self,
        repositories: &[Arc<Repository>],
        destination: &Path,
        source: bool,
        locale: bool,
    ) -> Result<Vec<(Arc<Repository>, Arc<Repository>)>> {
        let mut section = AsynchronousSection::new(self.threads_num, usize::MAX);

        for repository in repositories {
            let driver = self.driver.clone();
            let transport = self.transport.clone();
            let repository = repository.clone();
            let destination = destination.to_path_buf();

            section.execute(async move {
                let clone = driver
                    .fork_repository(&transport, &repository, &destination, source, locale)
                    .await?;

                Ok((repository, Arc::new(clone)))
            })?;
        }

        section.close().await
    }

    /// Download `packages` into `target` and index them.
    ///
    /// Package files keep their path relative to the repository root.
    /// `observer` is told how many bytes each download wrote; packages
    /// already present count as 0. Packages whose download failed within the
    /// error budget are left out of the index.
    pub async fn copy_packages(
        &self,
        target: &Arc<Repository>,
        packages: &[Arc<Package>],
        keep_existing: bool,
        observer: Option<CopyObserver>,
    ) -> Result<()> {
        let root = target.local_path()?;
        let mut section = AsynchronousSection::new(self.threads_num, self.ignore_errors_num);

        for package in packages {
            let transport = self.transport.clone();
            let observer = observer.clone();
            let url = package.url();
            let path = root.join(&package.filename);
            let size = package.filesize;
            let checksum = package.checksum.clone();
            let package = package.clone();

            section.execute(async move {
                let written = transport.retrieve(&url, &path, size, &checksum).await?;

                if let Some(observer) = observer {
                    observer(written);
                }

                Ok(package)
            })?;
        }

        let copied = section.close().await?;

        info!(
            "copied {} of {} packages to {}",
            copied.len(),
            packages.len(),
            target
        );

        self.assign_packages(target, &copied, keep_existing).await
    }

    /// Make `packages` the content of `target`.
    ///
    /// Packages already indexed by `target` are kept when `keep_existing`
    /// is set. Otherwise the files of those not in `packages` are removed.
    pub async fn assign_packages(
        &self,
        target: &Arc<Repository>,
        packages: &[Arc<Package>],
        keep_existing: bool,
    ) -> Result<()> {
        let mut existing = vec![];
        self.driver
            .get_packages(&self.transport, target, &mut |p| existing.push(p))
            .await?;

        let wanted = packages.iter().cloned().collect::<HashSet<_>>();
        let wanted_files = packages
            .iter()
            .map(|p| p.filename.as_str())
            .collect::<HashSet<_>>();

        let orphans = existing
            .into_iter()
            .filter(|p| !wanted.contains(p))
            .collect::<Vec<_>>();

        let mut packages = packages.to_vec();

        if keep_existing {
            packages.extend(orphans);
        } else {
            let root = target.local_path()?;

            for orphan in orphans {
                if wanted_files.contains(orphan.filename.as_str()) {
                    continue;
                }

                let path: PathBuf = root.join(&orphan.filename);
                if path.exists() {
                    std::fs::remove_file(&path)
                        .map_err(|e| PacketaryError::IoPath(format!("{}", path.display()), e))?;
                    debug!("removed {}", path.display());
                }
            }
        }

        self.driver.rebuild_repository(target, &packages).await
    }
}

#[cfg(test)]
pub(crate) mod test {
    use {
        super::*,
        crate::{
            drivers::deb::{
                archive::{read_control_file, test::build_deb},
                package_from_paragraph, DebRepositoryDriver,
            },
            package::RepositoryName,
        },
        std::sync::atomic::{AtomicU64, Ordering},
    };

    /// Create a local Debian repository at `root` holding `(name, version, depends)`.
    pub(crate) async fn deb_repository(
        root: &Path,
        packages: &[(&str, &str, &str)],
    ) -> Result<Arc<Repository>> {
        let driver = DebRepositoryDriver::default();
        let transport = Transport::new(&Configuration::default())?;

        let upstream = Repository::new(
            RepositoryName::Component {
                suite: "stable".into(),
                component: "main".into(),
            },
            "http://localhost/debian",
            "x86_64",
            "Test",
        );

        let repository = Arc::new(
            driver
                .fork_repository(&transport, &upstream, root, false, false)
                .await?,
        );
        let local = repository.local_path()?;

        let mut indexed = vec![];
        for (name, version, depends) in packages {
            let mut control = format!(
                "Package: {}\nVersion: {}\nArchitecture: amd64\n",
                name, version
            );
            if !depends.is_empty() {
                control.push_str(&format!("Depends: {}\n", depends));
            }

            let filename = format!("pool/main/{}_{}_amd64.deb", name, version);
            let path = local.join(&filename);
            std::fs::create_dir_all(local.join("pool").join("main"))?;
            std::fs::write(&path, build_deb(&control)?)?;

            let mut paragraph = read_control_file(&path)?;
            paragraph.set_field_from_string("Filename", &filename);
            indexed.push(Arc::new(package_from_paragraph(&repository, &paragraph)?));
        }

        driver.rebuild_repository(&repository, &indexed).await?;

        Ok(repository)
    }

    fn controller() -> Result<RepositoryController> {
        RepositoryController::load(&Configuration::default(), "deb", "x86_64")
    }

    async fn names(controller: &RepositoryController, repository: &Arc<Repository>) -> Result<Vec<String>> {
        let mut names = vec![];
        controller
            .load_packages(&[repository.clone()], &mut |p| names.push(p.name.clone()))
            .await?;
        names.sort();

        Ok(names)
    }

    #[tokio::test]
    async fn orphan_handling() -> Result<()> {
        let td = tempfile::tempdir()?;
        let target = deb_repository(&td.path().join("target"), &[("x", "1.0", "")]).await?;
        let upstream = deb_repository(&td.path().join("upstream"), &[("y", "1.0", "")]).await?;

        let controller = controller()?;

        let mut packages = vec![];
        controller
            .load_packages(&[upstream.clone()], &mut |p| packages.push(p))
            .await?;

        let written = Arc::new(AtomicU64::new(0));
        let counter = written.clone();
        let observer: CopyObserver = Arc::new(move |bytes| {
            counter.fetch_add(bytes, Ordering::SeqCst);
        });

        controller
            .copy_packages(&target, &packages, true, Some(observer))
            .await?;

        let root = target.local_path()?;
        assert_eq!(
            written.load(Ordering::SeqCst),
            std::fs::metadata(root.join("pool/main/y_1.0_amd64.deb"))?.len()
        );
        assert!(root.join("pool/main/x_1.0_amd64.deb").exists());
        assert_eq!(names(&controller, &target).await?, vec!["x", "y"]);

        controller.copy_packages(&target, &packages, false, None).await?;

        assert!(!root.join("pool/main/x_1.0_amd64.deb").exists());
        assert!(root.join("pool/main/y_1.0_amd64.deb").exists());
        assert_eq!(names(&controller, &target).await?, vec!["y"]);

        Ok(())
    }

    #[tokio::test]
    async fn failed_downloads_within_budget() -> Result<()> {
        let td = tempfile::tempdir()?;
        let target = deb_repository(&td.path().join("target"), &[]).await?;
        let upstream = deb_repository(
            &td.path().join("upstream"),
            &[("y", "1.0", ""), ("z", "1.0", "")],
        )
        .await?;

        std::fs::remove_file(upstream.local_path()?.join("pool/main/z_1.0_amd64.deb"))?;

        let controller = RepositoryController::load(
            &Configuration {
                ignore_errors_num: 2,
                ..Default::default()
            },
            "deb",
            "x86_64",
        )?;

        let mut packages = vec![];
        controller
            .load_packages(&[upstream.clone()], &mut |p| packages.push(p))
            .await?;

        controller
            .copy_packages(&target, &packages, false, None)
            .await?;

        assert_eq!(names(&controller, &target).await?, vec!["y"]);

        let strict = RepositoryController::load(
            &Configuration {
                ignore_errors_num: 0,
                ..Default::default()
            },
            "deb",
            "x86_64",
        )?;
        std::fs::remove_file(target.local_path()?.join("pool/main/y_1.0_amd64.deb"))?;
        assert!(matches!(
            strict.copy_packages(&target, &packages, false, None).await,
            Err(PacketaryError::TooManyErrors(1))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn fork_pairs() -> Result<()> {
        let td = tempfile::tempdir()?;
        let upstream = deb_repository(&td.path().join("upstream"), &[("a", "1", "")]).await?;

        let controller = controller()?;
        let location = format!("{} stable main", upstream.url);
        let repositories = controller.load_repositories(&[location]).await?;
        assert_eq!(repositories.len(), 1);
        assert_eq!(repositories[0].origin, "Test");

        let pairs = controller
            .fork_repositories(&repositories, &td.path().join("mirror"), false, false)
            .await?;

        assert_eq!(pairs.len(), 1);
        assert!(Arc::ptr_eq(&pairs[0].0, &repositories[0]));
        assert_eq!(names(&controller, &pairs[0].1).await?, Vec::<String>::new());

        Ok(())
    }
}
