// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! YUM repository metadata documents.

Only the elements needed to mirror a repository are modeled. Unknown
elements and attributes are ignored. Namespace prefixes (`rpm:`, `repo:`)
are not significant to the deserializer.
*/

use {
    crate::error::Result,
    serde::Deserialize,
    std::io::Read,
};

/// A `repomd.xml` file.
#[derive(Clone, Debug, Deserialize)]
pub struct RepoMd {
    /// Revision of the repository.
    pub revision: Option<String>,

    /// Metadata files constituting this repository.
    #[serde(default)]
    pub data: Vec<RepoMdData>,
}

impl RepoMd {
    /// Construct an instance by parsing XML from a reader.
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        Ok(serde_xml_rs::from_reader(reader)?)
    }

    /// Construct an instance by parsing XML from a string.
    pub fn from_xml(s: &str) -> Result<Self> {
        Ok(serde_xml_rs::from_str(s)?)
    }

    /// Find the first `<data>` entry of any of the given types.
    ///
    /// Types are tried in order.
    pub fn find_data(&self, types: &[&str]) -> Option<&RepoMdData> {
        types
            .iter()
            .find_map(|t| self.data.iter().find(|d| d.data_type == *t))
    }
}

/// A `<data>` element in a `repomd.xml` file.
#[derive(Clone, Debug, Deserialize)]
pub struct RepoMdData {
    #[serde(rename = "type")]
    pub data_type: String,
    pub location: Location,
    pub size: Option<u64>,
}

/// An `href` relative to the repository root.
#[derive(Clone, Debug, Deserialize)]
pub struct Location {
    pub href: String,
}

/// A `primary.xml` file.
#[derive(Clone, Debug, Deserialize)]
pub struct Primary {
    /// Number of packages the document claims to hold.
    #[serde(rename = "packages")]
    pub count: Option<usize>,

    #[serde(default, rename = "package")]
    pub packages: Vec<PrimaryPackage>,
}

impl Primary {
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        Ok(serde_xml_rs::from_reader(reader)?)
    }

    pub fn from_xml(s: &str) -> Result<Self> {
        Ok(serde_xml_rs::from_str(s)?)
    }
}

/// A `<package>` of a `primary.xml` file.
#[derive(Clone, Debug, Deserialize)]
pub struct PrimaryPackage {
    pub name: String,
    pub arch: String,
    pub version: EvrAttributes,
    pub checksum: Checksum,
    pub size: PackageSize,
    pub location: Location,
    pub format: Option<PackageFormat>,
}

/// `epoch`, `ver` and `rel` attributes.
#[derive(Clone, Debug, Deserialize)]
pub struct EvrAttributes {
    pub epoch: Option<u64>,
    #[serde(rename = "ver")]
    pub version: String,
    #[serde(rename = "rel")]
    pub release: Option<String>,
}

/// Content digest of a package file.
#[derive(Clone, Debug, Deserialize)]
pub struct Checksum {
    /// Digest name, e.g. `sha256`.
    #[serde(rename = "type")]
    pub name: String,

    /// Hex encoded digest.
    #[serde(rename = "$value")]
    pub value: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PackageSize {
    /// Size in bytes of the package file.
    pub package: u64,
}

/// The `<format>` element of a package.
#[derive(Clone, Debug, Deserialize)]
pub struct PackageFormat {
    pub provides: Option<Entries>,
    pub requires: Option<Entries>,
    pub obsoletes: Option<Entries>,

    /// Files provided by this package.
    #[serde(default, rename = "file")]
    pub files: Vec<FileEntry>,
}

/// A list of `<rpm:entry>` elements.
#[derive(Clone, Debug, Deserialize)]
pub struct Entries {
    #[serde(default, rename = "entry")]
    pub entries: Vec<PackageEntry>,
}

/// A package relationship.
#[derive(Clone, Debug, Deserialize)]
pub struct PackageEntry {
    pub name: String,

    /// Comparison flags: one of `LT`, `LE`, `EQ`, `GE` or `GT`.
    pub flags: Option<String>,

    pub epoch: Option<u64>,
    #[serde(rename = "ver")]
    pub version: Option<String>,
    #[serde(rename = "rel")]
    pub release: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FileEntry {
    #[serde(rename = "$value")]
    pub path: String,
}

/// A comps `groups.xml` document.
#[derive(Clone, Debug, Deserialize)]
pub struct Comps {
    #[serde(default, rename = "group")]
    pub groups: Vec<Group>,
}

impl Comps {
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        Ok(serde_xml_rs::from_reader(reader)?)
    }

    pub fn from_xml(s: &str) -> Result<Self> {
        Ok(serde_xml_rs::from_str(s)?)
    }

    /// Names of packages a default installation always carries.
    ///
    /// These are the `mandatory` and `default` members of the `core` and
    /// `base` groups.
    pub fn mandatory_packages(&self) -> impl Iterator<Item = &str> {
        self.groups
            .iter()
            .filter(|g| g.id == "core" || g.id == "base")
            .filter_map(|g| g.packagelist.as_ref())
            .flat_map(|list| list.packages.iter())
            .filter(|req| matches!(req.req_type.as_deref(), Some("mandatory") | Some("default")))
            .map(|req| req.name.as_str())
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Group {
    pub id: String,
    pub packagelist: Option<PackageList>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PackageList {
    #[serde(default, rename = "packagereq")]
    pub packages: Vec<PackageReq>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PackageReq {
    #[serde(rename = "type")]
    pub req_type: Option<String>,

    #[serde(rename = "$value")]
    pub name: String,
}

#[cfg(test)]
pub(crate) mod test {
    use {super::*, indoc::indoc};

    pub(crate) const REPOMD: &str = indoc! {r#"
        <?xml version="1.0" encoding="UTF-8"?>
        <repomd xmlns="http://linux.duke.edu/metadata/repo" xmlns:rpm="http://linux.duke.edu/metadata/rpm">
          <revision>1447925181</revision>
          <data type="primary">
            <checksum type="sha256">1d9a8a6eb7a5d6a2cf3c3d0c24e89d0cf0cfa5c37b6f8a7d3b2c4de3a2a1a0b9</checksum>
            <location href="repodata/primary.xml.gz"/>
            <timestamp>1447925181</timestamp>
            <size>1234</size>
          </data>
          <data type="group_gz">
            <checksum type="sha256">0d9a8a6eb7a5d6a2cf3c3d0c24e89d0cf0cfa5c37b6f8a7d3b2c4de3a2a1a0b9</checksum>
            <location href="repodata/comps.xml.gz"/>
          </data>
        </repomd>
    "#};

    pub(crate) const PRIMARY: &str = indoc! {r#"
        <?xml version="1.0" encoding="UTF-8"?>
        <metadata xmlns="http://linux.duke.edu/metadata/common" xmlns:rpm="http://linux.duke.edu/metadata/rpm" packages="2">
        <package type="rpm">
          <name>bash</name>
          <arch>x86_64</arch>
          <version epoch="0" ver="4.2.46" rel="12.el7"/>
          <checksum type="sha256" pkgid="YES">3a9b5a6c0e0a6e4e5d06b3c1a17d7d5b59d1e6a1b7e0b6c6a0d2a8f1b0c7e6d5</checksum>
          <summary>The GNU Bourne Again shell</summary>
          <size package="1037976" installed="3663714" archive="3670564"/>
          <location href="Packages/bash-4.2.46-12.el7.x86_64.rpm"/>
          <format>
            <rpm:license>GPLv3+</rpm:license>
            <rpm:provides>
              <rpm:entry name="bash" flags="EQ" epoch="0" ver="4.2.46" rel="12.el7"/>
              <rpm:entry name="config(bash)" flags="EQ" epoch="0" ver="4.2.46" rel="12.el7"/>
            </rpm:provides>
            <rpm:requires>
              <rpm:entry name="rpmlib(BuiltinLuaScripts)" flags="LE" epoch="0" ver="4.2.2" rel="1" pre="1"/>
              <rpm:entry name="libc.so.6(GLIBC_2.15)(64bit)"/>
              <rpm:entry name="filesystem" flags="GE" epoch="0" ver="3" pre="1"/>
            </rpm:requires>
            <file>/bin/bash</file>
            <file>/bin/sh</file>
          </format>
        </package>
        <package type="rpm">
          <name>yum</name>
          <arch>noarch</arch>
          <version epoch="0" ver="3.4.3" rel="132.el7.centos.0.1"/>
          <checksum type="sha">9d5a3d64e9a1fd2c1ab8d0a1d3e05d6c2f4d1a7f</checksum>
          <size package="1270016" installed="5835448" archive="5860592"/>
          <location href="Packages/yum-3.4.3-132.el7.centos.0.1.noarch.rpm"/>
          <format>
            <rpm:obsoletes>
              <rpm:entry name="yum-plugin-allowdowngrade" flags="LE" epoch="0" ver="1.1.22" rel="0"/>
              <rpm:entry name="yum-basearchonly"/>
            </rpm:obsoletes>
          </format>
        </package>
        </metadata>
    "#};

    pub(crate) const COMPS: &str = indoc! {r#"
        <?xml version="1.0" encoding="UTF-8"?>
        <comps>
          <group>
            <id>core</id>
            <name>Core</name>
            <default>true</default>
            <packagelist>
              <packagereq type="mandatory">bash</packagereq>
              <packagereq type="default">yum</packagereq>
              <packagereq type="optional">tboot</packagereq>
            </packagelist>
          </group>
          <group>
            <id>development</id>
            <packagelist>
              <packagereq type="mandatory">gcc</packagereq>
            </packagelist>
          </group>
        </comps>
    "#};

    #[test]
    fn repomd() -> Result<()> {
        let repomd = RepoMd::from_xml(REPOMD)?;

        assert_eq!(repomd.revision.as_deref(), Some("1447925181"));
        assert_eq!(
            repomd.find_data(&["primary"]).map(|d| d.location.href.as_str()),
            Some("repodata/primary.xml.gz")
        );
        assert_eq!(
            repomd
                .find_data(&["group_gz", "group"])
                .map(|d| d.location.href.as_str()),
            Some("repodata/comps.xml.gz")
        );
        assert!(repomd.find_data(&["filelists"]).is_none());

        Ok(())
    }

    #[test]
    fn primary() -> Result<()> {
        let primary = Primary::from_xml(PRIMARY)?;
        assert_eq!(primary.count, Some(2));
        assert_eq!(primary.packages.len(), 2);

        let bash = &primary.packages[0];
        assert_eq!(bash.version.release.as_deref(), Some("12.el7"));
        assert_eq!(bash.size.package, 1037976);
        assert_eq!(bash.checksum.name, "sha256");

        let format = bash.format.as_ref().unwrap();
        assert_eq!(format.requires.as_ref().unwrap().entries.len(), 3);
        assert_eq!(format.provides.as_ref().unwrap().entries[0].flags.as_deref(), Some("EQ"));
        assert_eq!(
            format.files.iter().map(|f| f.path.as_str()).collect::<Vec<_>>(),
            vec!["/bin/bash", "/bin/sh"]
        );

        let yum = &primary.packages[1];
        assert!(yum.format.as_ref().unwrap().requires.is_none());

        Ok(())
    }

    #[test]
    fn comps_mandatory() -> Result<()> {
        let comps = Comps::from_xml(COMPS)?;

        assert_eq!(comps.mandatory_packages().collect::<Vec<_>>(), vec!["bash", "yum"]);

        Ok(())
    }
}
