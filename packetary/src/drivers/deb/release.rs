// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Maintenance of suite level `Release` files.

A suite `Release` file (`dists/<suite>/Release`) lists the components and
architectures of the suite along with digests of every index file below it.
Components of one suite may be rebuilt concurrently, so updates happen under
an exclusive advisory lock on the file.
*/

use {
    crate::{
        drivers::deb::control::{ControlField, ControlParagraph},
        error::{PacketaryError, Result},
        io::{calculate_checksums, ChecksumType, DEFAULT_CHUNK_SIZE},
    },
    chrono::Utc,
    fs2::FileExt,
    log::debug,
    std::{
        collections::BTreeSet,
        io::{Read, Seek, SeekFrom},
        path::Path,
    },
};

/// Format of the `Date` field.
pub const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// Index files of a component that the suite `Release` describes.
pub const INDEX_FILES: &[&str] = &["Packages", "Release", "Packages.gz"];

/// An entry of a digest list: `<digest> <size> <path>`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReleaseFileEntry {
    pub path: String,
    pub digest: String,
    pub size: u64,
}

impl ReleaseFileEntry {
    fn parse(line: &str) -> Result<Self> {
        let parts = line.split_ascii_whitespace().collect::<Vec<_>>();

        match parts.as_slice() {
            [digest, size, path] => Ok(Self {
                path: path.to_string(),
                digest: digest.to_string(),
                size: size.parse()?,
            }),
            _ => Err(PacketaryError::ControlParse(format!(
                "malformed release entry: {}",
                line
            ))),
        }
    }

    fn to_line(&self) -> String {
        format!("{} {:>16} {}", self.digest, self.size, self.path)
    }
}

/// Add a word to a space separated field, keeping the words sorted.
fn add_word(paragraph: &mut ControlParagraph, name: &str, word: &str) {
    let mut words = paragraph
        .field(name)
        .map(|f| f.iter_words().map(|w| w.to_string()).collect::<BTreeSet<_>>())
        .unwrap_or_default();
    words.insert(word.to_string());

    paragraph.set_field_from_string(name, words.into_iter().collect::<Vec<_>>().join(" "));
}

/// Replace or append entries of a digest list field.
///
/// Entries for paths not in `updates` are preserved.
fn splice_entries(
    paragraph: &mut ControlParagraph,
    name: &str,
    updates: Vec<ReleaseFileEntry>,
) -> Result<()> {
    let mut entries = match paragraph.field(name) {
        Some(field) => field
            .iter_lines()
            .map(ReleaseFileEntry::parse)
            .collect::<Result<Vec<_>>>()?,
        None => vec![],
    };

    for update in updates {
        match entries.iter_mut().find(|e| e.path == update.path) {
            Some(existing) => *existing = update,
            None => entries.push(update),
        }
    }

    paragraph.set_field(ControlField::from_lines(
        name,
        entries.iter().map(|e| e.to_line()),
    ));

    Ok(())
}

/// Refresh the suite `Release` in `suite_dir` after rebuilding a component.
///
/// `architecture` is the Debian architecture name. The index files of the
/// component are expected at `<component>/binary-<architecture>/`.
pub fn update_suite_release(
    suite_dir: &Path,
    suite: &str,
    component: &str,
    architecture: &str,
    origin: &str,
) -> Result<()> {
    let path = suite_dir.join("Release");
    let io_error = |e| PacketaryError::IoPath(format!("{}", path.display()), e);

    let mut fh = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(&path)
        .map_err(io_error)?;

    fh.lock_exclusive().map_err(io_error)?;
    let res = rewrite_release(&mut fh, suite_dir, suite, component, architecture, origin);
    fh.unlock().map_err(io_error)?;

    res
}

fn rewrite_release(
    fh: &mut std::fs::File,
    suite_dir: &Path,
    suite: &str,
    component: &str,
    architecture: &str,
    origin: &str,
) -> Result<()> {
    let mut content = String::new();
    fh.read_to_string(&mut content)?;

    let mut release = ControlParagraph::parse_str(&content)?.unwrap_or_default();

    release.set_field_from_string("Date", Utc::now().format(DATE_FORMAT));
    release.set_default("Origin", origin);
    release.set_default("Label", origin);
    release.set_default("Suite", suite);
    release.set_default("Codename", suite.split('-').next().unwrap_or(suite));
    release.set_default("Description", format!("{} {}", origin, suite));

    add_word(&mut release, "Components", component);
    add_word(&mut release, "Architectures", architecture);

    let relative_dir = format!("{}/binary-{}", component, architecture);
    let types = ChecksumType::all().collect::<Vec<_>>();

    let checksums = calculate_checksums(
        INDEX_FILES.iter().map(|f| suite_dir.join(&relative_dir).join(f)),
        &types,
        DEFAULT_CHUNK_SIZE,
    )
    .collect::<Result<Vec<_>>>()?;

    for (i, checksum) in types.iter().enumerate() {
        let updates = INDEX_FILES
            .iter()
            .zip(checksums.iter())
            .map(|(name, (_, size, digests))| ReleaseFileEntry {
                path: format!("{}/{}", relative_dir, name),
                digest: digests[i].clone(),
                size: *size,
            })
            .collect::<Vec<_>>();

        splice_entries(&mut release, checksum.field_name(), updates)?;
    }

    fh.set_len(0)?;
    fh.seek(SeekFrom::Start(0))?;
    release.write(fh)?;
    fh.sync_all()?;

    debug!("updated {}/Release", suite_dir.display());

    Ok(())
}
