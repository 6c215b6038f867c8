//! Component C: Archive Codec (spec §4C).
//!
//! The outer archive is an uncompressed tar of exactly four entries
//! (`VERSION`, `CHECKSUM`, the metadata record, `contents.tar.gz`); the
//! inner archive is a gzip-compressed tar of the package's own files.

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use cargo_util::{is_safe_archive_path, touch_mtime, Sha256, Term};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::HexError;

const SUPPORTED_VERSIONS: &[&str] = &["2", "3"];
const WRITER_VERSION: &str = "3";

/// One package's metadata record (spec §4C "metadata is encoded as a
/// sequence of canonical-term records").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub name: String,
    pub version: String,
    pub app: Option<String>,
    pub build_tools: Vec<String>,
    pub requirements: Vec<MetadataRequirement>,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRequirement {
    pub name: String,
    pub requirement: String,
    pub optional: bool,
    pub app: String,
}

fn bool_atom(b: bool) -> Term {
    Term::atom(if b { "true" } else { "false" })
}

fn as_bool(t: &Term) -> Option<bool> {
    match t {
        Term::Atom(a) if a == "true" => Some(true),
        Term::Atom(a) if a == "false" => Some(false),
        _ => None,
    }
}

fn as_string(t: &Term) -> Option<String> {
    match t {
        Term::Atom(s) | Term::Binary(s) => Some(s.clone()),
        _ => None,
    }
}

fn field<'a>(pairs: &'a [(Term, Term)], key: &str) -> Option<&'a Term> {
    pairs
        .iter()
        .find(|(k, _)| as_string(k).as_deref() == Some(key))
        .map(|(_, v)| v)
}

impl Metadata {
    fn to_term(&self) -> Term {
        let mut pairs = vec![
            (Term::atom("name"), Term::binary(self.name.clone())),
            (Term::atom("version"), Term::binary(self.version.clone())),
        ];
        if let Some(app) = &self.app {
            pairs.push((Term::atom("app"), Term::binary(app.clone())));
        }
        pairs.push((
            Term::atom("build_tools"),
            Term::List(self.build_tools.iter().cloned().map(Term::binary).collect()),
        ));
        pairs.push((
            Term::atom("requirements"),
            Term::Map(
                self.requirements
                    .iter()
                    .map(|r| {
                        (
                            Term::binary(r.name.clone()),
                            Term::Map(vec![
                                (Term::atom("requirement"), Term::binary(r.requirement.clone())),
                                (Term::atom("optional"), bool_atom(r.optional)),
                                (Term::atom("app"), Term::binary(r.app.clone())),
                            ]),
                        )
                    })
                    .collect(),
            ),
        ));
        pairs.push((
            Term::atom("files"),
            Term::List(self.files.iter().cloned().map(Term::binary).collect()),
        ));
        Term::Map(pairs)
    }

    /// Canonical encoding, keys in sorted order (spec §4C "field ordering
    /// within the metadata is the sorted order of keys").
    fn encode(&self) -> String {
        let mut out = self.to_term().encode();
        out.push('\n');
        out
    }

    fn from_term(term: &Term) -> Result<Metadata, HexError> {
        let malformed = || HexError::Metadata("metadata root must be a key-sorted map".to_string());
        let Term::Map(pairs) = term else {
            return Err(malformed());
        };

        let name = field(pairs, "name").and_then(as_string).ok_or_else(malformed)?;
        let version = field(pairs, "version").and_then(as_string).ok_or_else(malformed)?;
        let app = field(pairs, "app").and_then(as_string);
        let build_tools = match field(pairs, "build_tools") {
            Some(Term::List(items)) => items
                .iter()
                .map(as_string)
                .collect::<Option<Vec<_>>>()
                .ok_or_else(malformed)?,
            _ => Vec::new(),
        };
        let requirements = match field(pairs, "requirements") {
            Some(Term::Map(reqs)) => reqs
                .iter()
                .map(|(name_term, value)| {
                    let name = as_string(name_term).ok_or_else(malformed)?;
                    let Term::Map(sub) = value else {
                        return Err(malformed());
                    };
                    Ok(MetadataRequirement {
                        name,
                        requirement: field(sub, "requirement").and_then(as_string).ok_or_else(malformed)?,
                        optional: field(sub, "optional").and_then(as_bool).unwrap_or(false),
                        app: field(sub, "app").and_then(as_string).ok_or_else(malformed)?,
                    })
                })
                .collect::<Result<Vec<_>, HexError>>()?,
            _ => Vec::new(),
        };
        let files = match field(pairs, "files") {
            Some(Term::List(items)) => items
                .iter()
                .map(as_string)
                .collect::<Option<Vec<_>>>()
                .ok_or_else(malformed)?,
            _ => Vec::new(),
        };

        Ok(Metadata {
            name,
            version,
            app,
            build_tools,
            requirements,
            files,
        })
    }
}

fn metadata_entry_name(version: &str) -> &'static str {
    if version == "2" {
        "metadata.exs"
    } else {
        "metadata.config"
    }
}

fn checksum_of(version: &str, metadata_bytes: &[u8], contents_gz: &[u8]) -> [u8; 32] {
    Sha256::new()
        .update(version.as_bytes())
        .update(metadata_bytes)
        .update(contents_gz)
        .finish()
}

/// Compresses `files` into `contents.tar.gz`, wraps it with `VERSION`,
/// `CHECKSUM`, and the metadata record into the outer archive (spec §4C
/// "Create contract").
pub fn pack(metadata: &Metadata, files: &[(String, Vec<u8>)]) -> Result<Vec<u8>, HexError> {
    if files.is_empty() {
        return Err(HexError::EmptyPackage);
    }

    let mut inner_tar = tar::Builder::new(Vec::new());
    for (name, contents) in files {
        let mut header = tar::Header::new_ustar();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        inner_tar.append_data(&mut header, name, contents.as_slice())?;
    }
    let inner_tar = inner_tar.into_inner()?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&inner_tar)?;
    let contents_gz = encoder.finish()?;

    let metadata_bytes = metadata.encode().into_bytes();
    let checksum = checksum_of(WRITER_VERSION, &metadata_bytes, &contents_gz);
    let checksum_hex = hex::encode(checksum);

    let mut outer = tar::Builder::new(Vec::new());
    append_entry(&mut outer, "VERSION", WRITER_VERSION.as_bytes())?;
    append_entry(&mut outer, "CHECKSUM", checksum_hex.as_bytes())?;
    append_entry(&mut outer, metadata_entry_name(WRITER_VERSION), &metadata_bytes)?;
    append_entry(&mut outer, "contents.tar.gz", &contents_gz)?;

    Ok(outer.into_inner()?)
}

fn append_entry(builder: &mut tar::Builder<Vec<u8>>, name: &str, data: &[u8]) -> std::io::Result<()> {
    let mut header = tar::Header::new_ustar();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, name, data)
}

fn read_outer(bytes: &[u8]) -> Result<HashMap<String, Vec<u8>>, HexError> {
    let mut archive = tar::Archive::new(Cursor::new(bytes));
    let mut entries = HashMap::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().into_owned();
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf)?;
        entries.insert(path, buf);
    }
    Ok(entries)
}

/// Validates and unpacks a tarball into `dest` (spec §4C "Unpack
/// contract", steps 1-8). `expected_checksum`, when present, is the
/// registry's recorded checksum for this release (step 5).
pub fn unpack(
    tarball_bytes: &[u8],
    dest: &Path,
    expected_checksum: Option<&[u8; 32]>,
) -> Result<Metadata, HexError> {
    let entries = read_outer(tarball_bytes)?;

    let version_bytes = entries.get("VERSION").ok_or(HexError::MissingFile("VERSION"))?;
    let version = String::from_utf8_lossy(version_bytes).trim().to_string();
    if !SUPPORTED_VERSIONS.contains(&version.as_str()) {
        return Err(HexError::UnsupportedVersion(version));
    }

    let metadata_key = metadata_entry_name(&version);
    let metadata_bytes = entries
        .get(metadata_key)
        .ok_or(HexError::MissingFile(metadata_key))?;
    let contents_gz = entries
        .get("contents.tar.gz")
        .ok_or(HexError::MissingFile("contents.tar.gz"))?;
    let checksum_entry = entries.get("CHECKSUM").ok_or(HexError::MissingFile("CHECKSUM"))?;

    let recomputed = checksum_of(&version, metadata_bytes, contents_gz);
    let recomputed_hex = hex::encode(recomputed);
    let recorded_hex = String::from_utf8_lossy(checksum_entry).trim().to_ascii_lowercase();
    if recomputed_hex != recorded_hex {
        return Err(HexError::ChecksumMismatch);
    }
    if let Some(expected) = expected_checksum {
        if &recomputed != expected {
            return Err(HexError::RegistryChecksumMismatch);
        }
    }

    let metadata_term = Term::parse(&String::from_utf8_lossy(metadata_bytes))
        .map_err(|e| HexError::Metadata(e.to_string()))?;
    let metadata = Metadata::from_term(&metadata_term)?;

    let mut extracted = Vec::new();
    let mut inner = tar::Archive::new(GzDecoder::new(Cursor::new(contents_gz.as_slice())));
    for entry in inner.entries()? {
        let mut entry = entry?;
        let entry_type = entry.header().entry_type();
        let rel_path = entry.path()?.into_owned();

        if entry_type.is_symlink() || entry_type.is_hard_link() {
            return Err(HexError::UnsafePath(rel_path));
        }
        if !is_safe_archive_path(&rel_path) {
            return Err(HexError::UnsafePath(rel_path));
        }

        let out_path = dest.join(&rel_path);
        if entry_type.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf)?;
        std::fs::write(&out_path, &buf)?;
        extracted.push(out_path);
    }

    for path in &extracted {
        touch_mtime(path)?;
    }

    write_metadata_sidecar(dest, &metadata)?;

    Ok(metadata)
}

fn write_metadata_sidecar(dest: &Path, metadata: &Metadata) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;
    let sidecar: PathBuf = dest.join("hex_metadata.config");
    std::fs::write(sidecar, metadata.encode())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> Metadata {
        Metadata {
            name: "demo".to_string(),
            version: "1.0.0".to_string(),
            app: Some("demo".to_string()),
            build_tools: vec!["mix".to_string()],
            requirements: vec![MetadataRequirement {
                name: "decimal".to_string(),
                requirement: "~> 2.0".to_string(),
                optional: false,
                app: "decimal".to_string(),
            }],
            files: vec!["mix.exs".to_string()],
        }
    }

    #[test]
    fn pack_then_unpack_round_trips_files_and_metadata() {
        let metadata = sample_metadata();
        let files = vec![("mix.exs".to_string(), b"contents".to_vec())];
        let archive = pack(&metadata, &files).unwrap();

        let dest = tempfile::tempdir().unwrap();
        let unpacked = unpack(&archive, dest.path(), None).unwrap();

        assert_eq!(unpacked, metadata);
        let written = std::fs::read(dest.path().join("mix.exs")).unwrap();
        assert_eq!(written, b"contents");
        assert!(dest.path().join("hex_metadata.config").exists());
    }

    #[test]
    fn empty_file_list_is_rejected() {
        let err = pack(&sample_metadata(), &[]).unwrap_err();
        assert!(matches!(err, HexError::EmptyPackage));
    }

    #[test]
    fn unsupported_outer_version_is_rejected() {
        let archive = pack(&sample_metadata(), &[("mix.exs".to_string(), b"x".to_vec())]).unwrap();
        let mut entries = read_outer(&archive).unwrap();
        entries.insert("VERSION".to_string(), b"1".to_vec());

        let mut outer = tar::Builder::new(Vec::new());
        for name in ["VERSION", "CHECKSUM", "metadata.config", "contents.tar.gz"] {
            append_entry(&mut outer, name, &entries[name]).unwrap();
        }
        let tampered = outer.into_inner().unwrap();

        let dest = tempfile::tempdir().unwrap();
        let err = unpack(&tampered, dest.path(), None).unwrap_err();
        assert!(matches!(err, HexError::UnsupportedVersion(v) if v == "1"));
    }

    #[test]
    fn checksum_mismatch_is_detected() {
        let archive = pack(&sample_metadata(), &[("mix.exs".to_string(), b"x".to_vec())]).unwrap();
        let mut entries = read_outer(&archive).unwrap();
        let mut tampered_contents = entries["contents.tar.gz"].clone();
        let last = tampered_contents.len() - 1;
        tampered_contents[last] ^= 0xFF;
        entries.insert("contents.tar.gz".to_string(), tampered_contents);

        let mut outer = tar::Builder::new(Vec::new());
        for name in ["VERSION", "CHECKSUM", "metadata.config", "contents.tar.gz"] {
            append_entry(&mut outer, name, &entries[name]).unwrap();
        }
        let tampered = outer.into_inner().unwrap();

        let dest = tempfile::tempdir().unwrap();
        let err = unpack(&tampered, dest.path(), None).unwrap_err();
        assert!(matches!(err, HexError::ChecksumMismatch));
    }

    #[test]
    fn registry_checksum_mismatch_is_distinguished_from_archive_checksum_mismatch() {
        let archive = pack(&sample_metadata(), &[("mix.exs".to_string(), b"x".to_vec())]).unwrap();
        let dest = tempfile::tempdir().unwrap();
        let bogus_checksum = [0u8; 32];
        let err = unpack(&archive, dest.path(), Some(&bogus_checksum)).unwrap_err();
        assert!(matches!(err, HexError::RegistryChecksumMismatch));
    }

    #[test]
    fn parent_escaping_inner_path_is_rejected() {
        let metadata = sample_metadata();
        let mut inner_tar = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_ustar();
        header.set_size(1);
        header.set_mode(0o644);
        header.set_cksum();
        inner_tar
            .append_data(&mut header, "../../etc/passwd", &b"x"[..])
            .unwrap();
        let inner_tar = inner_tar.into_inner().unwrap();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&inner_tar).unwrap();
        let contents_gz = encoder.finish().unwrap();

        let metadata_bytes = metadata.encode().into_bytes();
        let checksum = checksum_of(WRITER_VERSION, &metadata_bytes, &contents_gz);

        let mut outer = tar::Builder::new(Vec::new());
        append_entry(&mut outer, "VERSION", WRITER_VERSION.as_bytes()).unwrap();
        append_entry(&mut outer, "CHECKSUM", hex::encode(checksum).as_bytes()).unwrap();
        append_entry(&mut outer, "metadata.config", &metadata_bytes).unwrap();
        append_entry(&mut outer, "contents.tar.gz", &contents_gz).unwrap();
        let tarball = outer.into_inner().unwrap();

        let dest = tempfile::tempdir().unwrap();
        let err = unpack(&tarball, dest.path(), None).unwrap_err();
        assert!(matches!(err, HexError::UnsafePath(_)));
    }
}
