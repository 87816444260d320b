// src/metadata/discinfo.rs

//! `.discinfo` and `media.repo` files
//!
//! `.discinfo` is four lines: timestamp, description, arch and a
//! comma-separated disc number list (or `ALL`). `media.repo` is the
//! repository stanza an installed system uses to find the media.

use crate::error::{Error, Result};
use std::fmt::Write as _;
use std::path::Path;

/// Disc numbers a tree or image covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscNumbers {
    All,
    Discs(Vec<u32>),
}

/// Contents of a `.discinfo` file
#[derive(Debug, Clone, PartialEq)]
pub struct DiscInfo {
    pub timestamp: String,
    pub description: String,
    pub arch: String,
    pub disc_numbers: Option<DiscNumbers>,
}

/// Current time formatted as `.discinfo` expects (seconds with microseconds)
pub fn now_timestamp() -> String {
    let now = chrono::Utc::now();
    format!("{}.{:06}", now.timestamp(), now.timestamp_subsec_micros())
}

/// Write `.discinfo`, returning the timestamp used
///
/// `disc_numbers` of `None` writes `ALL`.
pub fn write_discinfo(
    path: &Path,
    description: &str,
    arch: &str,
    disc_numbers: Option<&[u32]>,
    timestamp: Option<&str>,
) -> Result<String> {
    let timestamp = timestamp.map(str::to_string).unwrap_or_else(now_timestamp);
    let discs = match disc_numbers {
        Some(nums) if !nums.is_empty() => nums
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(","),
        _ => "ALL".to_string(),
    };
    let mut content = String::new();
    let _ = writeln!(content, "{}", timestamp);
    let _ = writeln!(content, "{}", description);
    let _ = writeln!(content, "{}", arch);
    let _ = writeln!(content, "{}", discs);
    std::fs::write(path, content).map_err(|e| Error::io_path(path, e))?;
    Ok(timestamp)
}

pub fn read_discinfo(path: &Path) -> Result<DiscInfo> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io_path(path, e))?;
    let mut lines = content.lines().map(str::trim);
    let timestamp = lines.next().unwrap_or_default().to_string();
    let description = lines.next().unwrap_or_default().to_string();
    let arch = lines.next().unwrap_or_default().to_string();
    let disc_numbers = match lines.next().unwrap_or_default() {
        "" => None,
        "ALL" => Some(DiscNumbers::All),
        list => Some(DiscNumbers::Discs(
            list.split(',')
                .map(|n| {
                    n.trim()
                        .parse::<u32>()
                        .map_err(|e| Error::parse(".discinfo disc number", e))
                })
                .collect::<Result<Vec<_>>>()?,
        )),
    };
    Ok(DiscInfo {
        timestamp,
        description,
        arch,
        disc_numbers,
    })
}

/// Write `media.repo`; the media id is the `.discinfo` timestamp
pub fn write_media_repo(path: &Path, description: &str, timestamp: &str) -> Result<()> {
    let content = [
        "[InstallMedia]".to_string(),
        format!("name={}", description),
        format!("mediaid={}", timestamp),
        "metadata_expire=-1".to_string(),
        "gpgcheck=0".to_string(),
        "cost=500".to_string(),
        String::new(),
    ]
    .join("\n");
    std::fs::write(path, content).map_err(|e| Error::io_path(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discinfo_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".discinfo");
        let ts = write_discinfo(&path, "Fedora 21", "x86_64", Some(&[1, 2]), Some("1400000000.000000"))
            .unwrap();
        assert_eq!(ts, "1400000000.000000");
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "1400000000.000000\nFedora 21\nx86_64\n1,2\n"
        );
        let info = read_discinfo(&path).unwrap();
        assert_eq!(info.disc_numbers, Some(DiscNumbers::Discs(vec![1, 2])));

        write_discinfo(&path, "Fedora 21", "x86_64", None, None).unwrap();
        assert_eq!(read_discinfo(&path).unwrap().disc_numbers, Some(DiscNumbers::All));
    }

    #[test]
    fn test_media_repo() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("media.repo");
        write_media_repo(&path, "Fedora 21", "1400000000.000000").unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "[InstallMedia]\nname=Fedora 21\nmediaid=1400000000.000000\nmetadata_expire=-1\ngpgcheck=0\ncost=500\n"
        );
    }
}
