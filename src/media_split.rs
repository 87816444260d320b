// src/media_split.rs

//! Splitting a tree across fixed-size media
//!
//! Files are packed first-fit in the order they were added; the caller
//! decides priority. Sticky files are placed on every disc before any
//! other file, and every size is rounded up to whole blocks.

use crate::error::{Error, Result};
use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};

pub const DEFAULT_BLOCK_SIZE: u64 = 2048;

/// Parse a media size such as `4700000000`, `650M` or `4G`
pub fn convert_media_size(size: &str) -> Result<u64> {
    let size = size.trim();
    let (num, unit) = match size.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => (&size[..idx], c),
        _ => (size, 'b'),
    };
    let multiplier: u64 = match unit {
        'b' => 1,
        'k' => 1024,
        'M' => 1024 * 1024,
        'G' => 1024 * 1024 * 1024,
        other => {
            return Err(Error::InvalidValue(format!("Unknown media size unit '{}': {}", other, size)));
        }
    };
    let num: i64 = num
        .parse()
        .map_err(|_| Error::InvalidValue(format!("Media size must be a positive number: {}", size)))?;
    if num <= 0 {
        return Err(Error::InvalidValue(format!("Media size must be a positive number: {}", size)));
    }
    Ok(num as u64 * multiplier)
}

/// Round `size` up to a whole number of blocks
pub fn convert_file_size(size: u64, block_size: u64) -> u64 {
    size.div_ceil(block_size) * block_size
}

/// Lexically normalized path (`a/./b/../c` -> `a/c`)
fn normpath(name: &str) -> String {
    let mut parts: Vec<Component> = Vec::new();
    for component in Path::new(name).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }
    let path: PathBuf = parts.iter().collect();
    if path.as_os_str().is_empty() {
        ".".to_string()
    } else {
        path.to_string_lossy().into_owned()
    }
}

/// One medium of a split
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Disc {
    /// Block-rounded size of all files
    pub size: u64,
    pub files: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MediaSplitter {
    media_size: u64,
    block_size: u64,
    files: Vec<String>,
    file_sizes: HashMap<String, u64>,
    sticky_files: BTreeSet<String>,
}

impl MediaSplitter {
    pub fn new(media_size: u64) -> Self {
        Self::with_block_size(media_size, DEFAULT_BLOCK_SIZE)
    }

    pub fn with_block_size(media_size: u64, block_size: u64) -> Self {
        Self {
            media_size,
            block_size: block_size.max(1),
            files: Vec::new(),
            file_sizes: HashMap::new(),
            sticky_files: BTreeSet::new(),
        }
    }

    pub fn media_size(&self) -> u64 {
        self.media_size
    }

    /// Register a file; adding the same path again is allowed only with
    /// the same size
    ///
    /// Every disc carries all sticky files, so a file is rejected when it
    /// would not fit next to them, and a sticky file is rejected when some
    /// queued file would no longer fit.
    pub fn add_file(&mut self, name: &str, size: u64, sticky: bool) -> Result<()> {
        let name = normpath(name);
        if let Some(&old_size) = self.file_sizes.get(&name) {
            if old_size != size {
                return Err(Error::InvalidValue(format!(
                    "File size mismatch; file: {}; sizes: {} vs {}",
                    name, old_size, size
                )));
            }
        }
        let rounded = convert_file_size(size, self.block_size);
        if rounded > self.media_size {
            return Err(Error::InvalidValue(format!("File is larger than media size: {}", name)));
        }

        let is_sticky = sticky || self.sticky_files.contains(&name);
        let others = self.files.iter().filter(|f| **f != name);
        let (sticky_others, plain_others): (Vec<&String>, Vec<&String>) =
            others.partition(|f| self.sticky_files.contains(*f));
        let mut sticky_size: u64 = sticky_others.iter().map(|f| self.block_size_of(f)).sum();
        let mut largest = plain_others
            .iter()
            .map(|f| self.block_size_of(f))
            .max()
            .unwrap_or_default();
        if is_sticky {
            sticky_size += rounded;
        } else {
            largest = largest.max(rounded);
        }
        if sticky_size + largest > self.media_size {
            return Err(Error::InvalidValue(format!(
                "File does not fit on media together with sticky files: {} ({} + {} > {})",
                name, sticky_size, largest, self.media_size
            )));
        }

        if !self.file_sizes.contains_key(&name) {
            self.files.push(name.clone());
            self.file_sizes.insert(name.clone(), size);
        }
        if sticky {
            self.sticky_files.insert(name);
        }
        Ok(())
    }

    pub fn total_size(&self) -> u64 {
        self.file_sizes.values().sum()
    }

    pub fn total_size_in_blocks(&self) -> u64 {
        self.file_sizes
            .values()
            .map(|&s| convert_file_size(s, self.block_size))
            .sum()
    }

    fn block_size_of(&self, name: &str) -> u64 {
        convert_file_size(self.file_sizes.get(name).copied().unwrap_or_default(), self.block_size)
    }

    /// Assign files to discs
    ///
    /// A new disc is opened when the next file would overflow the current
    /// one; each new disc starts with every sticky file.
    pub fn split(&self) -> Vec<Disc> {
        let (sticky, rest): (Vec<&String>, Vec<&String>) =
            self.files.iter().partition(|name| self.sticky_files.contains(*name));
        let sticky_size: u64 = sticky.iter().map(|name| self.block_size_of(name)).sum();

        let mut discs: Vec<Disc> = Vec::new();
        for name in rest {
            let size = self.block_size_of(name);
            let needs_new = match discs.last() {
                None => true,
                Some(disc) => disc.size + size > self.media_size,
            };
            if needs_new {
                discs.push(Disc {
                    size: sticky_size,
                    files: sticky.iter().map(|s| s.to_string()).collect(),
                });
            }
            if let Some(disc) = discs.last_mut() {
                disc.files.push(name.clone());
                disc.size += size;
            }
        }
        discs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_media_size() {
        assert_eq!(convert_media_size("123").unwrap(), 123);
        assert_eq!(convert_media_size("123b").unwrap(), 123);
        assert_eq!(convert_media_size("2k").unwrap(), 2048);
        assert_eq!(convert_media_size("650M").unwrap(), 650 * 1024 * 1024);
        assert_eq!(convert_media_size("1G").unwrap(), 1024 * 1024 * 1024);
        assert!(convert_media_size("0").is_err());
        assert!(convert_media_size("-5M").is_err());
        assert!(convert_media_size("5T").is_err());
    }

    #[test]
    fn test_file_size_rounding() {
        assert_eq!(convert_file_size(0, 2048), 0);
        assert_eq!(convert_file_size(1, 2048), 2048);
        assert_eq!(convert_file_size(2048, 2048), 2048);
        assert_eq!(convert_file_size(2049, 2048), 4096);
    }

    #[test]
    fn test_sizes_are_block_rounded() {
        let mut ms = MediaSplitter::new(4096);
        ms.add_file("a", 1, false).unwrap();
        ms.add_file("b", 1, false).unwrap();
        ms.add_file("c", 1, false).unwrap();
        let discs = ms.split();
        assert_eq!(discs.len(), 2);
        assert_eq!(discs[0].size, 4096);
        assert_eq!(ms.total_size(), 3);
        assert_eq!(ms.total_size_in_blocks(), 3 * 2048);
    }

    #[test]
    fn test_same_path_twice() {
        let mut ms = MediaSplitter::with_block_size(100, 1);
        ms.add_file("Packages/a.rpm", 10, false).unwrap();
        ms.add_file("./Packages/a.rpm", 10, false).unwrap();
        assert!(ms.add_file("Packages/../Packages/a.rpm", 11, false).is_err());
        assert_eq!(ms.split()[0].files, vec!["Packages/a.rpm"]);
    }

    #[test]
    fn test_oversized_file_rejected() {
        let mut ms = MediaSplitter::with_block_size(10, 1);
        let err = ms.add_file("huge", 11, false).unwrap_err();
        assert!(err.to_string().contains("larger than media size"));
    }

    #[test]
    fn test_file_must_fit_next_to_sticky_files() {
        let mut ms = MediaSplitter::with_block_size(10, 1);
        ms.add_file("boot.img", 2, true).unwrap();
        let err = ms.add_file("big", 9, false).unwrap_err();
        assert!(err.to_string().contains("together with sticky files"), "{}", err);
        ms.add_file("fits", 8, false).unwrap();
        assert_eq!(ms.split()[0].size, 10);
    }

    #[test]
    fn test_late_sticky_file_checked_against_queue() {
        let mut ms = MediaSplitter::with_block_size(10, 1);
        ms.add_file("a", 6, false).unwrap();
        assert!(ms.add_file("stick", 6, true).is_err());
        ms.add_file("b", 3, false).unwrap();
        let discs = ms.split();
        assert_eq!(discs.len(), 1);
        assert_eq!(discs[0].files, vec!["a", "b"]);
    }

    #[test]
    fn test_only_sticky_files_make_no_disc() {
        let mut ms = MediaSplitter::with_block_size(10, 1);
        ms.add_file(".discinfo", 1, true).unwrap();
        assert!(ms.split().is_empty());
    }
}
