// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! I/O helpers.

This module holds the content digest machinery used to verify downloads and
to produce index checksums, plus the stream adapters used when consuming
remote metadata.
*/

use {
    crate::error::{PacketaryError, Result},
    async_compression::futures::bufread::GzipDecoder,
    futures::{AsyncBufRead, AsyncBufReadExt, AsyncRead},
    std::{
        io::Read,
        path::{Path, PathBuf},
        pin::Pin,
    },
};

/// Default number of bytes digested per read.
pub const DEFAULT_CHUNK_SIZE: usize = 16384;

/// Checksum type / digest mechanism.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ChecksumType {
    /// MD5.
    Md5,

    /// SHA-1.
    Sha1,

    /// SHA-256.
    Sha256,
}

impl ChecksumType {
    /// All variants, in the order indices list them.
    pub fn all() -> impl Iterator<Item = ChecksumType> {
        [Self::Md5, Self::Sha1, Self::Sha256].into_iter()
    }

    /// Name of the control field in suite `Release` files holding this variant type.
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5Sum",
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
        }
    }

    /// Name of the field in `Packages` stanzas holding this variant type.
    pub fn package_field_name(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5sum",
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
        }
    }

    /// Obtain a new hasher for this checksum flavor.
    pub fn new_hasher(&self) -> Box<dyn digest::DynDigest + Send> {
        match self {
            Self::Md5 => Box::new(md5::Md5::default()),
            Self::Sha1 => Box::new(sha1::Sha1::default()),
            Self::Sha256 => Box::new(sha2::Sha256::default()),
        }
    }
}

/// A content digester that simultaneously computes multiple digest types.
///
/// Digests are emitted in the order their types were requested.
pub struct MultiDigester {
    hashers: Vec<Box<dyn digest::DynDigest + Send>>,
}

impl MultiDigester {
    /// Construct an instance computing the given digest types.
    pub fn new(types: &[ChecksumType]) -> Self {
        Self {
            hashers: types.iter().map(|t| t.new_hasher()).collect(),
        }
    }

    /// Write content into the digesters.
    pub fn update(&mut self, data: &[u8]) {
        for hasher in self.hashers.iter_mut() {
            hasher.update(data);
        }
    }

    /// Finish digesting content, returning hex encoded digests.
    pub fn finish(self) -> Vec<String> {
        self.hashers
            .into_iter()
            .map(|h| hex::encode(h.finalize()))
            .collect()
    }
}

/// Digest a single file, returning its size and hex digests in requested order.
pub fn digest_file(
    path: &Path,
    types: &[ChecksumType],
    chunk_size: usize,
) -> Result<(u64, Vec<String>)> {
    let mut fh = std::fs::File::open(path)
        .map_err(|e| PacketaryError::IoPath(format!("{}", path.display()), e))?;

    let mut digester = MultiDigester::new(types);
    let mut buffer = vec![0u8; chunk_size.max(1)];
    let mut size = 0u64;

    loop {
        let count = fh.read(&mut buffer)?;
        if count == 0 {
            break;
        }

        digester.update(&buffer[0..count]);
        size += count as u64;
    }

    Ok((size, digester.finish()))
}

/// Compute size and digests for a sequence of files.
///
/// The iterator emits `(path, size, digests)` with digests in the order of `types`.
pub fn calculate_checksums<'a, P>(
    paths: impl IntoIterator<Item = P> + 'a,
    types: &'a [ChecksumType],
    chunk_size: usize,
) -> impl Iterator<Item = Result<(PathBuf, u64, Vec<String>)>> + 'a
where
    P: AsRef<Path>,
{
    paths.into_iter().map(move |path| {
        let path = path.as_ref().to_path_buf();
        let (size, digests) = digest_file(&path, types, chunk_size)?;

        Ok((path, size, digests))
    })
}

/// Compression format of a metadata stream.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Compression {
    /// No compression.
    None,

    /// Gzip compression (.gz extension).
    Gzip,
}

impl Compression {
    /// Resolve the compression of a path from its extension.
    pub fn from_path(path: &str) -> Self {
        if path.ends_with(".gz") {
            Self::Gzip
        } else {
            Self::None
        }
    }
}

/// Wrap a reader with transparent decompression.
pub fn read_decompressed<'a>(
    stream: impl AsyncBufRead + Send + 'a,
    compression: Compression,
) -> Pin<Box<dyn AsyncRead + Send + 'a>> {
    match compression {
        Compression::None => Box::pin(stream),
        Compression::Gzip => Box::pin(GzipDecoder::new(stream)),
    }
}

/// Buffered reading of lines and fixed sized blocks from a stream.
///
/// Bytes fetched past the boundary a caller asked for stay in the inner buffer
/// and are served by the next call.
pub struct LineReader<R> {
    inner: R,
}

impl<R> LineReader<R>
where
    R: AsyncBufRead + Unpin,
{
    /// Construct a new instance bound to a buffered reader.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read up to `size` bytes.
    ///
    /// Fewer bytes are returned only at end of stream.
    pub async fn read(&mut self, size: usize) -> Result<Vec<u8>> {
        let mut result = Vec::with_capacity(size);

        while result.len() < size {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                break;
            }

            let count = available.len().min(size - result.len());
            result.extend_from_slice(&available[0..count]);
            self.inner.consume_unpin(count);
        }

        Ok(result)
    }

    /// Read the next line, including its terminator.
    ///
    /// Resolves to [None] at end of stream.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();

        if self.inner.read_line(&mut line).await? == 0 {
            Ok(None)
        } else {
            Ok(Some(line))
        }
    }

    /// Read all remaining lines.
    pub async fn read_lines(&mut self) -> Result<Vec<String>> {
        let mut lines = vec![];

        while let Some(line) = self.read_line().await? {
            lines.push(line);
        }

        Ok(lines)
    }
}
