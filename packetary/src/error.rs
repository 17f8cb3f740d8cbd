// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use {crate::drivers::deb::version::VersionError, thiserror::Error};

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum PacketaryError {
    #[error("URL error: {0:?}")]
    Url(#[from] url::ParseError),

    #[error("HTTP error: {0:?}")]
    Reqwest(#[from] reqwest::Error),

    #[error("XML error: {0:?}")]
    Xml(#[from] serde_xml_rs::Error),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("integer parsing error: {0:?}")]
    ParseInt(#[from] std::num::ParseIntError),

    #[error("Debian version error: {0}")]
    DebianVersion(#[from] VersionError),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("server does not support range requests for {0}")]
    RangeNotSatisfiable(String),

    #[error("HTTP status {1} for {0}")]
    HttpStatus(String, u16),

    #[error("giving up on {0} after {1} attempts: {2}")]
    RetriesExhausted(String, u32, String),

    #[error("repository I/O error on path {0}: {1:?}")]
    IoPath(String, std::io::Error),

    #[error("content digest mismatch for {0}: expected {1}, got {2}")]
    DigestMismatch(String, String, String),

    #[error("size mismatch for {0}: expected {1} bytes, got {2}")]
    SizeMismatch(String, u64, u64),

    #[error("control file parse error: {0}")]
    ControlParse(String),

    #[error("control file not found in {0}")]
    ControlFileNotFound(String),

    #[error("unknown entry in binary package archive: {0}")]
    DebUnknownBinaryPackageEntry(String),

    #[error("unknown compression in deb archive file: {0}")]
    DebUnknownCompression(String),

    #[error("malformed package entry in {0}: {1}")]
    MalformedPackage(String, String),

    #[error("repository metadata entry not found: {0}")]
    MetadataFileNotFound(&'static str),

    #[error("failed to parse relation: {0}")]
    RelationParse(String),

    #[error("failed to parse version: {0}")]
    VersionParse(String),

    #[error("unknown repository driver: {0}")]
    UnknownDriver(String),

    #[error("{0} failed: {1}")]
    ExternalTool(&'static str, String),

    #[error("{0} is not available; command: {1}")]
    ExternalToolMissing(&'static str, String),

    #[error("too many errors: {0}")]
    TooManyErrors(usize),

    #[error("cannot submit work to a section that is no longer open")]
    SectionClosed,

    #[error("background task failed: {0}")]
    Join(String),
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, PacketaryError>;
