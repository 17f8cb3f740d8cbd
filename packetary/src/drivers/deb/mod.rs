// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian (APT) repositories.

Repositories are addressed as `<base> <suite> <component>...`. Each component
of each suite is a separate [Repository] whose index lives at
`<base>/dists/<suite>/<component>/binary-<arch>/`.
*/

pub mod archive;
pub mod control;
pub mod release;
pub mod version;

use {
    crate::{
        drivers::{
            deb::control::{ControlParagraph, ControlParagraphAsyncReader},
            local_directory_url, PackageConsumer, RepositoryDriver, RepositoryLocation,
        },
        error::{PacketaryError, Result},
        io::{digest_file, read_decompressed, ChecksumType, Compression, DEFAULT_CHUNK_SIZE},
        package::{FileChecksum, Package, Repository, RepositoryName},
        relation::{PackageRelation, RangeOp, VersionRange},
        transport::Transport,
        version::VersionScheme,
    },
    async_trait::async_trait,
    futures::io::BufReader,
    log::{debug, error, info},
    std::{
        io::Write,
        path::{Path, PathBuf},
        sync::Arc,
    },
};

/// `Priority` values and their rank. Lower is more important.
const PRIORITIES: &[(&str, u32)] = &[
    ("required", 1),
    ("important", 2),
    ("standard", 3),
    ("optional", 4),
    ("extra", 5),
];

/// Packages with a priority rank at or below this are mandatory.
const MANDATORY_PRIORITY: u32 = 3;

/// Fields whose relations become requirements.
const REQUIRES_FIELDS: &[&str] = &["Depends", "Pre-Depends", "Recommends"];

/// Map an architecture name to its Debian spelling.
pub fn debian_architecture(architecture: &str) -> Result<&'static str> {
    match architecture {
        "x86_64" => Ok("amd64"),
        "i386" => Ok("i386"),
        "source" => Ok("Source"),
        _ => Err(PacketaryError::InvalidUrl(format!(
            "unsupported architecture: {}",
            architecture
        ))),
    }
}

/// Parse a single alternative such as `libc6:any (>= 2.14) [amd64]`.
fn parse_alternative(s: &str) -> Result<(String, VersionRange)> {
    let s = s.trim();

    let (head, constraint) = match s.find('(') {
        Some(start) => {
            let end = s[start..]
                .find(')')
                .map(|pos| start + pos)
                .ok_or_else(|| PacketaryError::RelationParse(s.to_string()))?;

            (&s[0..start], Some(s[start + 1..end].trim()))
        }
        None => (s, None),
    };

    let name = head
        .split_ascii_whitespace()
        .next()
        .and_then(|word| word.split([':', '[', '<']).next())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| PacketaryError::RelationParse(s.to_string()))?;

    let range = match constraint {
        Some(constraint) => {
            let split = constraint
                .find(|c| !matches!(c, '<' | '>' | '='))
                .unwrap_or(constraint.len());
            let (op, edge) = constraint.split_at(split);

            let op = RangeOp::parse(op.trim())
                .ok_or_else(|| PacketaryError::RelationParse(s.to_string()))?;

            VersionRange::new(op, VersionScheme::Deb.parse(edge.trim())?)
        }
        None => VersionRange::any(),
    };

    Ok((name.to_string(), range))
}

/// Parse a relationship field such as `Depends`.
///
/// `,` separates relations and `|` separates alternatives of one relation.
pub fn parse_relations(value: &str) -> Result<Vec<PackageRelation>> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|relation| {
            PackageRelation::from_args(
                relation
                    .split('|')
                    .map(parse_alternative)
                    .collect::<Result<Vec<_>>>()?,
            )
        })
        .collect()
}

fn field_relations(paragraph: &ControlParagraph, fields: &[&str]) -> Result<Vec<PackageRelation>> {
    let mut relations = vec![];

    for field in fields {
        if let Some(value) = paragraph.field_str(field) {
            relations.extend(parse_relations(value)?);
        }
    }

    Ok(relations)
}

fn is_mandatory(paragraph: &ControlParagraph) -> bool {
    if paragraph.field_bool("Essential").unwrap_or(false) {
        return true;
    }

    paragraph
        .field_str("Priority")
        .and_then(|priority| PRIORITIES.iter().find(|(name, _)| *name == priority))
        .map(|(_, rank)| *rank <= MANDATORY_PRIORITY)
        .unwrap_or(false)
}

/// Convert a `Packages` paragraph into a [Package].
pub fn package_from_paragraph(
    repository: &Arc<Repository>,
    paragraph: &ControlParagraph,
) -> Result<Package> {
    let checksum = FileChecksum {
        md5: paragraph.field_str("MD5sum").map(|x| x.to_string()),
        sha1: paragraph.field_str("SHA1").map(|x| x.to_string()),
        sha256: paragraph.field_str("SHA256").map(|x| x.to_string()),
    };

    let filesize = match paragraph.field_u64("Size") {
        Some(size) => size? as i64,
        None => -1,
    };

    Ok(Package {
        repository: repository.clone(),
        name: paragraph.required_field_str("Package")?.to_string(),
        version: VersionScheme::Deb.parse(paragraph.required_field_str("Version")?)?,
        filename: paragraph.required_field_str("Filename")?.to_string(),
        filesize,
        checksum,
        mandatory: is_mandatory(paragraph),
        requires: field_relations(paragraph, REQUIRES_FIELDS)?,
        provides: field_relations(paragraph, &["Provides"])?,
        obsoletes: field_relations(paragraph, &["Replaces"])?,
    })
}

fn suite_and_component(repository: &Repository) -> Result<(&str, &str)> {
    match &repository.name {
        RepositoryName::Component { suite, component } => Ok((suite.as_str(), component.as_str())),
        RepositoryName::Flat(name) => Err(PacketaryError::InvalidUrl(format!(
            "{} is not a Debian component",
            name
        ))),
    }
}

/// Path of the component index directory relative to the repository root.
fn component_path(repository: &Repository) -> Result<String> {
    let (suite, component) = suite_and_component(repository)?;

    Ok(format!(
        "dists/{}/{}/binary-{}",
        suite,
        component,
        debian_architecture(&repository.architecture)?
    ))
}

fn create_file(path: &Path) -> Result<std::fs::File> {
    std::fs::File::create(path).map_err(|e| PacketaryError::IoPath(format!("{}", path.display()), e))
}

/// Write the component level `Release` file.
fn write_component_release(dir: &Path, repository: &Repository) -> Result<()> {
    let (suite, component) = suite_and_component(repository)?;

    let mut release = ControlParagraph::default();
    release.set_field_from_string("Origin", &repository.origin);
    release.set_field_from_string("Label", &repository.origin);
    release.set_field_from_string("Archive", suite);
    release.set_field_from_string("Component", component);
    release.set_field_from_string(
        "Architecture",
        debian_architecture(&repository.architecture)?,
    );

    let mut fh = create_file(&dir.join("Release"))?;
    release.write(&mut fh)?;

    Ok(())
}

/// Driver for Debian repositories.
#[derive(Clone, Debug, Default)]
pub struct DebRepositoryDriver {}

#[async_trait]
impl RepositoryDriver for DebRepositoryDriver {
    fn name(&self) -> &'static str {
        "deb"
    }

    fn version_scheme(&self) -> VersionScheme {
        VersionScheme::Deb
    }

    fn parse_urls(&self, urls: &[String]) -> Result<Vec<RepositoryLocation>> {
        let mut locations = vec![];

        for url in urls {
            let mut words = url.split_ascii_whitespace();

            let base = words
                .next()
                .ok_or_else(|| PacketaryError::InvalidUrl(url.clone()))?;
            let base = base.trim_end_matches('/');
            let base = base.strip_suffix("/dists").unwrap_or(base);

            let suite = words
                .next()
                .ok_or_else(|| PacketaryError::InvalidUrl(format!("{}: missing suite", url)))?;

            let components = words.collect::<Vec<_>>();
            if components.is_empty() {
                return Err(PacketaryError::InvalidUrl(format!(
                    "{}: missing component",
                    url
                )));
            }

            for component in components {
                locations.push(RepositoryLocation::Component {
                    url: format!("{}/", base),
                    suite: suite.to_string(),
                    component: component.to_string(),
                });
            }
        }

        Ok(locations)
    }

    async fn get_repository(
        &self,
        transport: &Transport,
        location: &RepositoryLocation,
        architecture: &str,
    ) -> Result<Repository> {
        let (url, suite, component) = match location {
            RepositoryLocation::Component {
                url,
                suite,
                component,
            } => (url, suite, component),
            RepositoryLocation::Flat { url } => {
                return Err(PacketaryError::InvalidUrl(format!(
                    "{} lacks suite and component",
                    url
                )))
            }
        };

        let mut repository = Repository::new(
            RepositoryName::Component {
                suite: suite.clone(),
                component: component.clone(),
            },
            url,
            architecture,
            "",
        );

        let release_url = format!("{}{}/Release", repository.url, component_path(&repository)?);
        debug!("loading {}", release_url);

        let mut reader =
            ControlParagraphAsyncReader::new(transport.open_stream(&release_url, 0).await?);

        if let Some(release) = reader.read_paragraph().await? {
            if let Some(origin) = release.field_str("Origin") {
                repository.origin = origin.to_string();
            }
        }

        info!("loaded repository {}", repository);

        Ok(repository)
    }

    async fn get_packages(
        &self,
        transport: &Transport,
        repository: &Arc<Repository>,
        consumer: &mut PackageConsumer<'_>,
    ) -> Result<()> {
        let index_url = format!("{}{}/Packages.gz", repository.url, component_path(repository)?);

        let stream = transport.open_stream(&index_url, 0).await?;
        let mut reader = ControlParagraphAsyncReader::new(BufReader::new(read_decompressed(
            stream,
            Compression::Gzip,
        )));

        let mut count = 0;
        while let Some(paragraph) = reader.read_paragraph().await? {
            match package_from_paragraph(repository, &paragraph) {
                Ok(package) => {
                    consumer(Arc::new(package));
                    count += 1;
                }
                Err(e) => {
                    error!("malformed package entry in {}: {}", index_url, e);
                    return Err(PacketaryError::MalformedPackage(index_url, e.to_string()));
                }
            }
        }

        info!("loaded {} packages from {}", count, repository);

        Ok(())
    }

    async fn fork_repository(
        &self,
        _transport: &Transport,
        repository: &Repository,
        destination: &Path,
        source: bool,
        locale: bool,
    ) -> Result<Repository> {
        if source || locale {
            debug!("source and localization packages are not copied for {}", repository);
        }

        let clone = Repository::new(
            repository.name.clone(),
            local_directory_url(destination)?,
            &repository.architecture,
            &repository.origin,
        );

        let root = clone.local_path()?;
        let dir = root.join(component_path(&clone)?);
        std::fs::create_dir_all(&dir)
            .map_err(|e| PacketaryError::IoPath(format!("{}", dir.display()), e))?;

        write_component_release(&dir, &clone)?;

        let packages = dir.join("Packages");
        if !packages.exists() {
            create_file(&packages)?;
        }

        let packages_gz = dir.join("Packages.gz");
        if !packages_gz.exists() {
            let encoder = libflate::gzip::Encoder::new(create_file(&packages_gz)?)?;
            encoder.finish().into_result()?;
        }

        let (suite, component) = suite_and_component(&clone)?;
        release::update_suite_release(
            &root.join("dists").join(suite),
            suite,
            component,
            debian_architecture(&clone.architecture)?,
            &clone.origin,
        )?;

        info!("forked {} to {}", repository, clone.url);

        Ok(clone)
    }

    async fn rebuild_repository(
        &self,
        repository: &Arc<Repository>,
        packages: &[Arc<Package>],
    ) -> Result<()> {
        let root = repository.local_path()?;
        let dir: PathBuf = root.join(component_path(repository)?);
        std::fs::create_dir_all(&dir)
            .map_err(|e| PacketaryError::IoPath(format!("{}", dir.display()), e))?;

        if !dir.join("Release").exists() {
            write_component_release(&dir, repository)?;
        }

        let mut packages = packages.to_vec();
        packages.sort();
        packages.dedup();

        let mut plain = std::io::BufWriter::new(create_file(&dir.join("Packages"))?);
        let mut gz = libflate::gzip::Encoder::new(create_file(&dir.join("Packages.gz"))?)?;

        let types = ChecksumType::all().collect::<Vec<_>>();

        for package in &packages {
            let path = root.join(&package.filename);

            let mut control = archive::read_control_file(&path)?;
            let (size, digests) = digest_file(&path, &types, DEFAULT_CHUNK_SIZE)?;

            control.set_field_from_string("Origin", &repository.origin);
            control.set_field_from_string("Filename", &package.filename);
            control.set_field_from_string("Size", size);
            for (checksum, digest) in types.iter().zip(digests) {
                control.set_field_from_string(checksum.package_field_name(), digest);
            }

            for writer in [&mut plain as &mut dyn Write, &mut gz] {
                control.write(writer)?;
                writer.write_all(b"\n")?;
            }
        }

        plain.flush()?;
        gz.finish().into_result()?;

        let (suite, component) = suite_and_component(repository)?;
        release::update_suite_release(
            &root.join("dists").join(suite),
            suite,
            component,
            debian_architecture(&repository.architecture)?,
            &repository.origin,
        )?;

        info!(
            "rebuilt index of {} with {} packages",
            repository,
            packages.len()
        );

        Ok(())
    }
}
