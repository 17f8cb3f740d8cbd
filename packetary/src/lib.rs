// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Dependency-aware mirroring of package repositories.

This crate mirrors Debian (APT) and RedHat (YUM) package repositories. A
mirror can be a full copy of its upstream or the minimal subset of packages
needed to satisfy a set of requirements, with dependencies resolved
transitively.

# A Tour of Functionality

The package model lives in [package] ([package::Package],
[package::Repository]), [relation] ([relation::PackageRelation],
[relation::VersionRange]) and [version] ([version::PackageVersion] with the
ordering rules of each repository family).

[index::Index] answers `(name, version range)` queries against packages and
the names they provide or obsolete. [tree::PackagesTree] builds on it to
compute minimal dependency-closed subsets and unresolved dependencies.

Repository families are implemented by [drivers::RepositoryDriver]
implementations in [drivers::deb] and [drivers::rpm]. They read upstream
metadata, create empty local repositories and regenerate their indices.

Content is fetched by [transport::Transport], which retries failed requests
and resumes partial downloads. Concurrent work runs in an
[section::AsynchronousSection], which bounds concurrency and tolerates a
configurable number of failures.

[controller::RepositoryController] ties a driver, the transport and
concurrent sections together and [api::RepositoryApi] exposes the high
level operations: listing packages, finding unresolved dependencies and
cloning repositories.
*/

pub mod api;
pub mod config;
pub mod controller;
pub mod drivers;
pub mod error;
pub mod index;
pub mod io;
pub mod package;
pub mod relation;
pub mod section;
pub mod transport;
pub mod tree;
pub mod version;

pub use crate::{
    api::{CloneOptions, CopyEvent, CopyStatistics, ProgressCallback, RepositoryApi, Requirements},
    config::Configuration,
    error::{PacketaryError, Result},
};
