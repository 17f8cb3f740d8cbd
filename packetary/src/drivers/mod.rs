// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Repository family drivers.

A [RepositoryDriver] knows the metadata layout of one repository family. It
turns user supplied URLs into repository locations, reads repositories and
their packages, and writes local copies of them.

Drivers are looked up by name with [driver_for_name].
*/

pub mod deb;
pub mod rpm;

use {
    crate::{
        error::{PacketaryError, Result},
        package::{Package, Repository},
        transport::Transport,
        version::VersionScheme,
    },
    async_trait::async_trait,
    std::{path::Path, sync::Arc},
};

/// Where a repository lives, as understood by its driver.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RepositoryLocation {
    /// A repository rooted at a single URL.
    Flat { url: String },

    /// A Debian style `(suite, component)` below a base URL.
    Component {
        url: String,
        suite: String,
        component: String,
    },
}

/// Receives packages as a driver parses them.
pub type PackageConsumer<'a> = dyn FnMut(Arc<Package>) + Send + 'a;

/// Interface to a repository family.
#[async_trait]
pub trait RepositoryDriver: Send + Sync {
    /// Name the driver is registered under.
    fn name(&self) -> &'static str;

    /// How versions of this family are parsed and ordered.
    fn version_scheme(&self) -> VersionScheme;

    /// Normalize user supplied URLs into repository locations.
    fn parse_urls(&self, urls: &[String]) -> Result<Vec<RepositoryLocation>>;

    /// Open the repository at a location for an architecture.
    async fn get_repository(
        &self,
        transport: &Transport,
        location: &RepositoryLocation,
        architecture: &str,
    ) -> Result<Repository>;

    /// Stream the packages of a repository to `consumer`, in index order.
    async fn get_packages(
        &self,
        transport: &Transport,
        repository: &Arc<Repository>,
        consumer: &mut PackageConsumer<'_>,
    ) -> Result<()>;

    /// Create an empty local repository below `destination` mirroring the
    /// layout of `repository`.
    async fn fork_repository(
        &self,
        transport: &Transport,
        repository: &Repository,
        destination: &Path,
        source: bool,
        locale: bool,
    ) -> Result<Repository>;

    /// Regenerate the index of a local repository from `packages`.
    ///
    /// Package files must already be present below the repository root.
    async fn rebuild_repository(
        &self,
        repository: &Arc<Repository>,
        packages: &[Arc<Package>],
    ) -> Result<()>;
}

/// Names of the available drivers.
pub const DRIVER_NAMES: &[&str] = &["deb", "rpm"];

/// Resolve a driver by name.
pub fn driver_for_name(name: &str) -> Result<Arc<dyn RepositoryDriver>> {
    match name {
        "deb" => Ok(Arc::new(deb::DebRepositoryDriver::default())),
        "rpm" => Ok(Arc::new(rpm::RpmRepositoryDriver::default())),
        _ => Err(PacketaryError::UnknownDriver(name.to_string())),
    }
}

/// Create a directory and return it as a normalized `file://` URL.
pub(crate) fn local_directory_url(path: &Path) -> Result<String> {
    std::fs::create_dir_all(path)
        .map_err(|e| PacketaryError::IoPath(format!("{}", path.display()), e))?;

    let path = path
        .canonicalize()
        .map_err(|e| PacketaryError::IoPath(format!("{}", path.display()), e))?;

    url::Url::from_directory_path(&path)
        .map(|u| u.to_string())
        .map_err(|_| PacketaryError::InvalidUrl(format!("{}", path.display())))
}
