// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Reading metadata out of `.deb` files.

A `.deb` binary package file is an ar archive with 3 entries:

1. `debian-binary` holding the version of the binary package format.
2. `control.tar[.<ext>]` holding package metadata.
3. `data.tar[.<ext>]` holding file content.

Only the `control` file inside `control.tar` is of interest here.
*/

use {
    crate::{
        drivers::deb::control::{parse_paragraphs, ControlParagraph},
        error::{PacketaryError, Result},
    },
    std::{
        io::{Cursor, Read},
        path::Path,
    },
};

fn reader_from_filename(extension: &str, data: Cursor<Vec<u8>>) -> Result<Box<dyn Read>> {
    match extension {
        "" => Ok(Box::new(data)),
        ".gz" => Ok(Box::new(libflate::gzip::Decoder::new(data)?)),
        ".xz" => Ok(Box::new(xz2::read::XzDecoder::new(data))),
        ".zst" => Ok(Box::new(zstd::Decoder::new(data)?)),
        _ => Err(PacketaryError::DebUnknownCompression(extension.to_string())),
    }
}

/// Extract the `control` paragraph of a `.deb` read from `reader`.
pub fn read_control<R: Read>(reader: R, source: &str) -> Result<ControlParagraph> {
    let mut archive = ar::Archive::new(reader);

    while let Some(entry) = archive.next_entry() {
        let mut entry = entry?;
        let filename = String::from_utf8_lossy(entry.header().identifier()).to_string();

        if filename == "debian-binary" || filename.starts_with("data.tar") {
            continue;
        }

        let tail = filename
            .strip_prefix("control.tar")
            .ok_or_else(|| PacketaryError::DebUnknownBinaryPackageEntry(filename.clone()))?;

        let mut data = vec![];
        entry.read_to_end(&mut data)?;

        let mut control_tar = tar::Archive::new(reader_from_filename(tail, Cursor::new(data))?);

        for member in control_tar.entries()? {
            let mut member = member?;
            let path = String::from_utf8_lossy(&member.path_bytes()).to_string();

            if path.trim_start_matches("./") == "control" {
                let mut content = vec![];
                member.read_to_end(&mut content)?;

                return parse_paragraphs(Cursor::new(content))?
                    .into_iter()
                    .next()
                    .ok_or_else(|| PacketaryError::ControlFileNotFound(source.to_string()));
            }
        }
    }

    Err(PacketaryError::ControlFileNotFound(source.to_string()))
}

/// Extract the `control` paragraph of a `.deb` file.
pub fn read_control_file(path: &Path) -> Result<ControlParagraph> {
    let fh = std::fs::File::open(path)
        .map_err(|e| PacketaryError::IoPath(format!("{}", path.display()), e))?;

    read_control(std::io::BufReader::new(fh), &format!("{}", path.display()))
}
