// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! RedHat (YUM) repositories.

A repository is a single URL holding `repodata/repomd.xml`. The packages are
listed by the `primary` metadata file and mandatory packages are derived
from the comps groups document, when the repository has one.

Local indices are produced by the `createrepo` tool.
*/

pub mod metadata;

use {
    crate::{
        drivers::{
            local_directory_url,
            rpm::metadata::{Comps, PackageEntry, PrimaryPackage, RepoMd},
            PackageConsumer, RepositoryDriver, RepositoryLocation,
        },
        error::{PacketaryError, Result},
        io::{read_decompressed, Compression},
        package::{FileChecksum, Package, Repository, RepositoryName},
        relation::{PackageRelation, RangeOp, VersionRange},
        transport::{resolve_url, Transport},
        version::{RpmVersion, VersionScheme},
    },
    async_trait::async_trait,
    futures::AsyncReadExt,
    log::{debug, error, info, warn},
    std::{
        collections::HashSet,
        io::{BufRead, BufReader, Write},
        path::{Path, PathBuf},
        sync::Arc,
    },
};

const CREATEREPO: &str = "createrepo";

/// Environment variable overriding the location of `createrepo`.
pub const CREATEREPO_PATH_ENV: &str = "CREATEREPO_PATH";

/// `repomd.xml` data types holding the comps document, in preference order.
const GROUP_TYPES: &[&str] = &["group_gz", "group"];

/// Name of the comps document stored in forked repositories.
const COMPS_FILENAME: &str = "comps.xml";

const PKGLIST_FILENAME: &str = ".pkglist";

fn range_op(flags: &str) -> Result<RangeOp> {
    match flags {
        "LT" => Ok(RangeOp::Lt),
        "LE" => Ok(RangeOp::Le),
        "EQ" => Ok(RangeOp::Eq),
        "GE" => Ok(RangeOp::Ge),
        "GT" => Ok(RangeOp::Gt),
        _ => Err(PacketaryError::RelationParse(format!(
            "unknown comparison flags: {}",
            flags
        ))),
    }
}

fn entry_relation(entry: &PackageEntry) -> Result<PackageRelation> {
    let range = match (&entry.flags, &entry.version) {
        (Some(flags), Some(version)) => VersionRange::new(
            range_op(flags)?,
            RpmVersion::new(
                entry.epoch.unwrap_or(0),
                version,
                entry.release.as_deref().unwrap_or(""),
            )
            .into(),
        ),
        _ => VersionRange::any(),
    };

    Ok(PackageRelation::new(&entry.name, range))
}

/// Convert a `primary.xml` package into a [Package].
///
/// `mandatory` holds the names of packages the comps document marks as
/// always installed.
pub fn package_from_primary(
    repository: &Arc<Repository>,
    package: PrimaryPackage,
    mandatory: &HashSet<String>,
) -> Result<Package> {
    let mut checksum = FileChecksum::default();
    match package.checksum.name.as_str() {
        "md5" => checksum.md5 = Some(package.checksum.value),
        "sha" | "sha1" => checksum.sha1 = Some(package.checksum.value),
        "sha256" => checksum.sha256 = Some(package.checksum.value),
        name => debug!("ignoring {} digest of {}", name, package.name),
    }

    let mut requires = vec![];
    let mut provides = vec![];
    let mut obsoletes = vec![];

    if let Some(format) = &package.format {
        if let Some(entries) = &format.requires {
            for entry in &entries.entries {
                // Capabilities of rpm itself.
                if entry.name.starts_with("rpmlib(") {
                    continue;
                }
                requires.push(entry_relation(entry)?);
            }
        }

        if let Some(entries) = &format.provides {
            for entry in &entries.entries {
                provides.push(entry_relation(entry)?);
            }
        }

        for file in &format.files {
            provides.push(PackageRelation::new(&file.path, VersionRange::any()));
        }

        if let Some(entries) = &format.obsoletes {
            for entry in &entries.entries {
                obsoletes.push(entry_relation(entry)?);
            }
        }
    }

    Ok(Package {
        repository: repository.clone(),
        mandatory: mandatory.contains(&package.name),
        version: RpmVersion::new(
            package.version.epoch.unwrap_or(0),
            &package.version.version,
            package.version.release.as_deref().unwrap_or(""),
        )
        .into(),
        name: package.name,
        filename: package.location.href,
        filesize: package.size.package as i64,
        checksum,
        requires,
        provides,
        obsoletes,
    })
}

/// Fetch a metadata file, decompressing it according to its extension.
async fn fetch(transport: &Transport, url: &str) -> Result<Vec<u8>> {
    debug!("loading {}", url);

    let stream = transport.open_stream(url, 0).await?;
    let mut reader = read_decompressed(stream, Compression::from_path(url));

    let mut data = vec![];
    reader.read_to_end(&mut data).await?;

    Ok(data)
}

async fn load_repomd(transport: &Transport, repository_url: &str) -> Result<RepoMd> {
    let data = fetch(transport, &format!("{}repodata/repomd.xml", repository_url)).await?;

    RepoMd::from_reader(data.as_slice())
}

/// Fetch the decompressed comps document of a repository, if it has one.
async fn load_groups(
    transport: &Transport,
    repository_url: &str,
    repomd: &RepoMd,
) -> Result<Option<Vec<u8>>> {
    match repomd.find_data(GROUP_TYPES) {
        Some(data) => Ok(Some(
            fetch(
                transport,
                &format!("{}{}", repository_url, data.location.href),
            )
            .await?,
        )),
        None => Ok(None),
    }
}

/// Locate the `createrepo` executable.
fn find_createrepo() -> Option<PathBuf> {
    match std::env::var_os(CREATEREPO_PATH_ENV) {
        Some(path) => {
            let path = PathBuf::from(path);
            path.exists().then(|| path)
        }
        None => which::which(CREATEREPO).ok(),
    }
}

fn run_createrepo(exe: &Path, args: &[String]) -> Result<()> {
    let command = duct::cmd(exe, args)
        .stderr_to_stdout()
        .unchecked()
        .reader()?;
    {
        let reader = BufReader::new(&command);
        for line in reader.lines() {
            info!("{}: {}", CREATEREPO, line?);
        }
    }

    let output = command.try_wait()?.ok_or_else(|| {
        PacketaryError::ExternalTool(CREATEREPO, "unable to wait on command".to_string())
    })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(PacketaryError::ExternalTool(
            CREATEREPO,
            format!("exited with {}", output.status),
        ))
    }
}

fn io_path_error(path: &Path) -> impl Fn(std::io::Error) -> PacketaryError + '_ {
    move |e| PacketaryError::IoPath(format!("{}", path.display()), e)
}

/// Driver for YUM repositories.
#[derive(Clone, Debug, Default)]
pub struct RpmRepositoryDriver {}

#[async_trait]
impl RepositoryDriver for RpmRepositoryDriver {
    fn name(&self) -> &'static str {
        "rpm"
    }

    fn version_scheme(&self) -> VersionScheme {
        VersionScheme::Rpm
    }

    fn parse_urls(&self, urls: &[String]) -> Result<Vec<RepositoryLocation>> {
        urls.iter()
            .map(|url| {
                let url = url.trim().trim_end_matches('/');
                if url.is_empty() {
                    Err(PacketaryError::InvalidUrl("empty repository URL".to_string()))
                } else {
                    Ok(RepositoryLocation::Flat {
                        url: url.to_string(),
                    })
                }
            })
            .collect()
    }

    async fn get_repository(
        &self,
        transport: &Transport,
        location: &RepositoryLocation,
        architecture: &str,
    ) -> Result<Repository> {
        let url = match location {
            RepositoryLocation::Flat { url } => url,
            RepositoryLocation::Component { url, .. } => {
                return Err(PacketaryError::InvalidUrl(format!(
                    "{} is not a flat repository",
                    url
                )))
            }
        };

        let name = resolve_url(url)?.path().trim_matches('/').to_string();
        let repository = Repository::new(RepositoryName::Flat(name), url, architecture, "");

        let repomd = load_repomd(transport, &repository.url).await?;
        debug!(
            "{} is at revision {}",
            repository.url,
            repomd.revision.as_deref().unwrap_or("unknown")
        );

        info!("loaded repository {}", repository);

        Ok(repository)
    }

    async fn get_packages(
        &self,
        transport: &Transport,
        repository: &Arc<Repository>,
        consumer: &mut PackageConsumer<'_>,
    ) -> Result<()> {
        let repomd = load_repomd(transport, &repository.url).await?;

        let mandatory = match load_groups(transport, &repository.url, &repomd).await? {
            Some(data) => {
                let comps = Comps::from_reader(data.as_slice())?;
                comps
                    .mandatory_packages()
                    .map(|name| name.to_string())
                    .collect::<HashSet<_>>()
            }
            None => HashSet::new(),
        };

        let primary_url = format!(
            "{}{}",
            repository.url,
            repomd
                .find_data(&["primary"])
                .ok_or(PacketaryError::MetadataFileNotFound("primary"))?
                .location
                .href
        );

        let primary = metadata::Primary::from_reader(fetch(transport, &primary_url).await?.as_slice())?;

        let mut count = 0;
        for package in primary.packages {
            match package_from_primary(repository, package, &mandatory) {
                Ok(package) => {
                    consumer(Arc::new(package));
                    count += 1;
                }
                Err(e) => {
                    error!("malformed package entry in {}: {}", primary_url, e);
                    return Err(PacketaryError::MalformedPackage(primary_url, e.to_string()));
                }
            }
        }

        info!("loaded {} packages from {}", count, repository);

        Ok(())
    }

    async fn fork_repository(
        &self,
        transport: &Transport,
        repository: &Repository,
        destination: &Path,
        source: bool,
        locale: bool,
    ) -> Result<Repository> {
        if source || locale {
            debug!("source and localization packages are not copied for {}", repository);
        }

        let clone = Arc::new(Repository::new(
            repository.name.clone(),
            local_directory_url(&destination.join(repository.name.to_string()))?,
            &repository.architecture,
            &repository.origin,
        ));
        let root = clone.local_path()?;

        let repomd = load_repomd(transport, &repository.url).await?;
        if let Some(data) = load_groups(transport, &repository.url, &repomd).await? {
            let path = root.join(COMPS_FILENAME);
            std::fs::write(&path, data).map_err(io_path_error(&path))?;
        }

        self.rebuild_repository(&clone, &[]).await?;

        info!("forked {} to {}", repository, clone.url);

        Ok(clone.as_ref().clone())
    }

    async fn rebuild_repository(
        &self,
        repository: &Arc<Repository>,
        packages: &[Arc<Package>],
    ) -> Result<()> {
        let root = repository.local_path()?;
        std::fs::create_dir_all(&root).map_err(io_path_error(&root))?;

        let mut packages = packages.to_vec();
        packages.sort();
        packages.dedup();

        let list_path = root.join(PKGLIST_FILENAME);
        {
            let mut fh = std::io::BufWriter::new(
                std::fs::File::create(&list_path).map_err(io_path_error(&list_path))?,
            );
            for package in &packages {
                writeln!(fh, "{}", package.filename)?;
            }
            fh.flush()?;
        }

        let mut args = vec![
            "--update".to_string(),
            "--pkglist".to_string(),
            format!("{}", list_path.display()),
        ];
        let comps = root.join(COMPS_FILENAME);
        if comps.exists() {
            args.push("--groupfile".to_string());
            args.push(format!("{}", comps.display()));
        }
        args.push("--outputdir".to_string());
        args.push(format!("{}", root.display()));
        args.push(format!("{}", root.display()));

        let command_line = format!("{} {}", CREATEREPO, args.join(" "));

        let exe = match find_createrepo() {
            Some(exe) => exe,
            None => {
                warn!(
                    "{} is not available; index of {} must be built with: {}",
                    CREATEREPO, repository, command_line
                );
                return Err(PacketaryError::ExternalToolMissing(CREATEREPO, command_line));
            }
        };

        debug!("running {}", command_line);
        let res = tokio::task::spawn_blocking(move || run_createrepo(&exe, &args))
            .await
            .map_err(|e| PacketaryError::Join(e.to_string()))?;

        if let Err(e) = std::fs::remove_file(&list_path) {
            debug!("unable to remove {}: {}", list_path.display(), e);
        }

        if let Err(e) = res {
            let partial = root.join(".repodata");
            if partial.exists() {
                std::fs::remove_dir_all(&partial).map_err(io_path_error(&partial))?;
            }
            error!("{} failed for {}: {}", CREATEREPO, repository, e);

            return Err(e);
        }

        info!(
            "rebuilt index of {} with {} packages",
            repository,
            packages.len()
        );

        Ok(())
    }
}
