// src/metadata/checksum.rs

//! Image checksums
//!
//! Images carry `<image>.MD5SUM` and `<image>.SHA256SUM` sidecar files in
//! the BSD-style format `MD5 (name) = hex` and are recorded in the image
//! manifest with the same digests.

use crate::error::{Error, Result};
use md5::Md5;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Digest algorithms recorded for images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChecksumType {
    Md5,
    Sha256,
}

impl ChecksumType {
    pub const ALL: [ChecksumType; 2] = [ChecksumType::Md5, ChecksumType::Sha256];

    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
        }
    }

    /// Hex length of a digest
    #[inline]
    pub const fn hex_len(&self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha256 => 64,
        }
    }

    /// Sidecar path for `image`, e.g. `boot.iso.SHA256SUM`
    pub fn sidecar(&self, image: &Path) -> PathBuf {
        let mut name = image.as_os_str().to_os_string();
        name.push(format!(".{}SUM", self.name().to_uppercase()));
        PathBuf::from(name)
    }
}

impl fmt::Display for ChecksumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ChecksumType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            _ => Err(Error::InvalidValue(format!("unknown checksum type: {}", s))),
        }
    }
}

enum HasherState {
    Md5(Md5),
    Sha256(Sha256),
}

/// Incremental hasher over one of the supported algorithms
pub struct Hasher {
    state: HasherState,
}

impl Hasher {
    pub fn new(checksum_type: ChecksumType) -> Self {
        let state = match checksum_type {
            ChecksumType::Md5 => HasherState::Md5(Md5::new()),
            ChecksumType::Sha256 => HasherState::Sha256(Sha256::new()),
        };
        Self { state }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Md5(h) => h.update(data),
            HasherState::Sha256(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> String {
        match self.state {
            HasherState::Md5(h) => hex::encode(h.finalize()),
            HasherState::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

/// Digest every requested algorithm in a single pass over the file
pub fn compute_file_checksums(
    path: &Path,
    types: &[ChecksumType],
) -> Result<BTreeMap<ChecksumType, String>> {
    let mut file = File::open(path).map_err(|e| Error::io_path(path, e))?;
    let mut hashers: Vec<(ChecksumType, Hasher)> =
        types.iter().map(|t| (*t, Hasher::new(*t))).collect();
    let mut buffer = vec![0u8; 1024 * 1024];
    loop {
        let read = file.read(&mut buffer).map_err(|e| Error::io_path(path, e))?;
        if read == 0 {
            break;
        }
        for (_, hasher) in hashers.iter_mut() {
            hasher.update(&buffer[..read]);
        }
    }
    Ok(hashers
        .into_iter()
        .map(|(t, h)| (t, h.finalize()))
        .collect())
}

/// Write `<image>.<TYPE>SUM` sidecars and return the digests
pub fn write_checksum_files(image: &Path) -> Result<BTreeMap<ChecksumType, String>> {
    let sums = compute_file_checksums(image, &ChecksumType::ALL)?;
    let name = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    for (checksum_type, value) in &sums {
        let line = format!(
            "{} ({}) = {}\n",
            checksum_type.name().to_uppercase(),
            name,
            value
        );
        let sidecar = checksum_type.sidecar(image);
        std::fs::write(&sidecar, line).map_err(|e| Error::io_path(&sidecar, e))?;
    }
    Ok(sums)
}

/// Parse a sidecar line into (digest, file name)
///
/// Both the BSD form `MD5 (name) = hex` and the coreutils form
/// `hex *name` are accepted.
pub fn parse_checksum_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if let Some((head, digest)) = line.rsplit_once(") = ") {
        let (_, name) = head.split_once(" (")?;
        return Some((digest.to_string(), name.to_string()));
    }
    let (digest, name) = line.split_once(char::is_whitespace)?;
    let name = name.trim_start().trim_start_matches('*');
    Some((digest.to_string(), name.to_string()))
}

/// Read the first entry of a sidecar file
pub fn read_checksum_file(path: &Path) -> Result<Option<(String, String)>> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io_path(path, e))?;
    Ok(content.lines().find_map(parse_checksum_line))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digests() {
        let mut md5 = Hasher::new(ChecksumType::Md5);
        md5.update(b"hello world");
        assert_eq!(md5.finalize(), "5eb63bbbe01eeed093cb22bb8f5acdc3");

        let mut sha = Hasher::new(ChecksumType::Sha256);
        sha.update(b"hello ");
        sha.update(b"world");
        assert_eq!(
            sha.finalize(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_sidecar_files() {
        let tmp = tempfile::tempdir().unwrap();
        let image = tmp.path().join("boot.iso");
        std::fs::write(&image, b"hello world").unwrap();

        let sums = write_checksum_files(&image).unwrap();
        assert_eq!(sums[&ChecksumType::Md5].len(), ChecksumType::Md5.hex_len());

        let sidecar = ChecksumType::Md5.sidecar(&image);
        assert!(sidecar.ends_with("boot.iso.MD5SUM"));
        let (digest, name) = read_checksum_file(&sidecar).unwrap().unwrap();
        assert_eq!(digest, "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(name, "boot.iso");
    }

    #[test]
    fn test_parse_coreutils_line() {
        assert_eq!(
            parse_checksum_line("abc123 *disc1.iso"),
            Some(("abc123".to_string(), "disc1.iso".to_string()))
        );
        assert_eq!("SHA256".parse::<ChecksumType>().unwrap(), ChecksumType::Sha256);
        assert!("crc32".parse::<ChecksumType>().is_err());
    }
}
