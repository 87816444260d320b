// src/linker.rs

//! File placement into the compose tree
//!
//! Gathered packages and installer files are placed with one of five link
//! modes. Placement never overwrites: a destination that already holds the
//! same content (same size and same mtime in whole seconds) is accepted as
//! is, anything else is a conflict.
//!
//! A precache keyed by (file name, mtime, size) remembers files already
//! present in the compose, so identical content reached through a different
//! source path is hardlinked instead of copied again.

use crate::config::ComposeConf;
use crate::error::{Error, Result};
use crate::pool::WorkerPool;
use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};
use walkdir::WalkDir;

/// How a file reaches its destination
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::AsRefStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum LinkType {
    Hardlink,
    Copy,
    Symlink,
    #[default]
    HardlinkOrCopy,
    AbspathSymlink,
}

/// Result of placing one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    Created,
    /// The destination already holds identical content
    AlreadyPresent,
    /// The destination exists with different content or type
    Conflict(String),
}

impl LinkType {
    /// `link_type` option, `hardlink-or-copy` when unset
    pub fn from_conf(conf: &ComposeConf) -> Result<Self> {
        match conf.get_str("link_type") {
            None => Ok(LinkType::default()),
            Some(value) => value
                .parse()
                .map_err(|_| Error::Config(vec![format!("Invalid link_type: {}", value)])),
        }
    }
}

impl LinkOutcome {
    /// Turn a conflict into [`Error::LinkConflict`]
    pub fn into_result(self, dst: &Path) -> Result<LinkOutcome> {
        match self {
            LinkOutcome::Conflict(reason) => Err(Error::LinkConflict {
                dst: dst.to_path_buf(),
                reason,
            }),
            other => Ok(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PrecacheKey {
    file_name: String,
    mtime: i64,
    size: u64,
}

impl PrecacheKey {
    fn new(path: &Path, meta: &fs::Metadata) -> Self {
        Self {
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            mtime: meta.mtime(),
            size: meta.size(),
        }
    }
}

/// Path of `target` relative to the directory `from_dir`
pub fn relative_path(target: &Path, from_dir: &Path) -> PathBuf {
    let target: Vec<Component> = target.components().collect();
    let base: Vec<Component> = from_dir.components().collect();
    let common = target
        .iter()
        .zip(base.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut result = PathBuf::new();
    for _ in common..base.len() {
        result.push("..");
    }
    for component in &target[common..] {
        result.push(component.as_os_str());
    }
    result
}

fn symlink_metadata(path: &Path) -> Option<fs::Metadata> {
    fs::symlink_metadata(path).ok()
}

#[derive(Debug, Default)]
pub struct Linker {
    precache: Mutex<HashMap<PrecacheKey, PathBuf>>,
    /// (dev, inode) of copied sources -> first copy, so hardlinked sources
    /// stay hardlinked in the destination
    inode_map: Mutex<HashMap<(u64, u64), PathBuf>>,
}

impl Linker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same size and mtime; a dangling symlink at `dst` counts as the same
    fn is_same(src: &Path, dst: &Path) -> Result<bool> {
        if src == dst {
            return Ok(true);
        }
        if symlink_metadata(dst).is_some_and(|m| m.file_type().is_symlink()) && !dst.exists() {
            return Ok(true);
        }
        let src_meta = fs::metadata(src).map_err(|e| Error::io_path(src, e))?;
        let dst_meta = fs::metadata(dst).map_err(|e| Error::io_path(dst, e))?;
        Ok(src_meta.len() == dst_meta.len() && src_meta.mtime() == dst_meta.mtime())
    }

    fn is_same_type(src: &Path, dst: &Path) -> bool {
        let (Some(a), Some(b)) = (symlink_metadata(src), symlink_metadata(dst)) else {
            return false;
        };
        a.file_type().is_symlink() == b.file_type().is_symlink()
            && src.is_dir() == dst.is_dir()
            && src.is_file() == dst.is_file()
    }

    /// Outcome for a destination that already exists
    fn existing(src: &Path, dst: &Path) -> Result<LinkOutcome> {
        if !Self::is_same(src, dst)? {
            return Ok(LinkOutcome::Conflict(format!(
                "file exists and differs from {}",
                src.display()
            )));
        }
        if !Self::is_same_type(src, dst) {
            error!(
                "File {} already exists but has different type than {}",
                dst.display(),
                src.display()
            );
            return Ok(LinkOutcome::Conflict(format!(
                "file exists with a different type than {}",
                src.display()
            )));
        }
        debug!("The same file already exists, skipping {}", dst.display());
        Ok(LinkOutcome::AlreadyPresent)
    }

    /// Remember `path` as a hardlink source for identical files
    pub fn put_into_cache(&self, path: &Path) -> Result<bool> {
        let meta = fs::metadata(path).map_err(|e| Error::io_path(path, e))?;
        let key = PrecacheKey::new(path, &meta);
        let mut cache = self.precache.lock().map_err(|_| poisoned("precache"))?;
        if let Some(cached) = cache.get(&key) {
            debug!(
                "Not caching {}, {} has the same name, size and mtime",
                path.display(),
                cached.display()
            );
            return Ok(false);
        }
        cache.insert(key, path.to_path_buf());
        Ok(true)
    }

    /// Populate the precache with every file under `dir`
    pub fn scan(&self, dir: &Path) -> Result<()> {
        debug!("[BEGIN] Scanning directory: {}", dir.display());
        for entry in walkdir::WalkDir::new(dir) {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            if entry.file_type().is_file() {
                self.put_into_cache(entry.path())?;
            }
        }
        debug!("[DONE ] Scanning directory: {}", dir.display());
        Ok(())
    }

    /// Hardlink from a cached identical file, if there is one
    fn hardlink_on_dest(&self, src: &Path, dst: &Path) -> Result<Option<LinkOutcome>> {
        if src == dst {
            return Ok(Some(LinkOutcome::AlreadyPresent));
        }
        let Ok(meta) = fs::metadata(src) else {
            return Ok(None);
        };
        let key = PrecacheKey::new(src, &meta);
        let cached = self
            .precache
            .lock()
            .map_err(|_| poisoned("precache"))?
            .get(&key)
            .cloned();
        match cached {
            Some(cached) if cached != dst => {
                debug!("Precache hit for {} [{}]", src.display(), cached.display());
                self.hardlink(&cached, dst).map(Some)
            }
            Some(_) => Ok(Some(LinkOutcome::AlreadyPresent)),
            None => Ok(None),
        }
    }

    pub fn hardlink(&self, src: &Path, dst: &Path) -> Result<LinkOutcome> {
        if src == dst {
            return Ok(LinkOutcome::AlreadyPresent);
        }
        info!("Hardlinking {} to {}", src.display(), dst.display());
        match fs::hard_link(src, dst) {
            Ok(()) => Ok(LinkOutcome::Created),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Self::existing(src, dst),
            Err(e) => Err(Error::io_path(dst, e)),
        }
    }

    pub fn copy(&self, src: &Path, dst: &Path) -> Result<LinkOutcome> {
        if src == dst {
            return Ok(LinkOutcome::AlreadyPresent);
        }
        let src_meta = fs::symlink_metadata(src).map_err(|e| Error::io_path(src, e))?;
        if src_meta.file_type().is_symlink() {
            info!("Copying symlink {} to {}", src.display(), dst.display());
        } else {
            info!("Copying file {} to {}", src.display(), dst.display());
        }

        if symlink_metadata(dst).is_some() {
            return Self::existing(src, dst);
        }

        if src_meta.file_type().is_symlink() {
            let target = fs::read_link(src).map_err(|e| Error::io_path(src, e))?;
            std::os::unix::fs::symlink(&target, dst).map_err(|e| Error::io_path(dst, e))?;
            return Ok(LinkOutcome::Created);
        }

        let inode = (src_meta.dev(), src_meta.ino());
        let first_copy = self
            .inode_map
            .lock()
            .map_err(|_| poisoned("inode map"))?
            .get(&inode)
            .cloned();
        if let Some(first) = first_copy {
            debug!("Hardlink detected, hardlinking {} to {}", first.display(), dst.display());
            fs::hard_link(&first, dst).map_err(|e| Error::io_path(dst, e))?;
            return Ok(LinkOutcome::Created);
        }

        // two workers racing on one inode both copy; the map keeps the first
        copy_preserving_mtime(src, dst)?;
        self.inode_map
            .lock()
            .map_err(|_| poisoned("inode map"))?
            .entry(inode)
            .or_insert_with(|| dst.to_path_buf());

        if !Self::is_same(src, dst)? {
            return Ok(LinkOutcome::Conflict(format!(
                "copy does not match {}",
                src.display()
            )));
        }
        self.put_into_cache(dst)?;
        Ok(LinkOutcome::Created)
    }

    /// Symlink `dst` to `src`, relative to `dst`'s directory unless `relative`
    /// is false
    pub fn symlink(&self, src: &Path, dst: &Path, relative: bool) -> Result<LinkOutcome> {
        if src == dst {
            return Ok(LinkOutcome::AlreadyPresent);
        }
        let target = if relative {
            relative_path(src, dst.parent().unwrap_or(Path::new("/")))
        } else {
            src.to_path_buf()
        };
        info!("Symlinking {} -> {}", dst.display(), target.display());

        match std::os::unix::fs::symlink(&target, dst) {
            Ok(()) => Ok(LinkOutcome::Created),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let is_link = symlink_metadata(dst).is_some_and(|m| m.file_type().is_symlink());
                if is_link
                    && Self::is_same(src, dst)?
                    && fs::read_link(dst).is_ok_and(|existing| existing == target)
                {
                    debug!("The same symlink already exists: {}", dst.display());
                    Ok(LinkOutcome::AlreadyPresent)
                } else {
                    Ok(LinkOutcome::Conflict(format!(
                        "cannot symlink to {}, destination exists",
                        target.display()
                    )))
                }
            }
            Err(e) => Err(Error::io_path(dst, e)),
        }
    }

    fn link_file(&self, src: &Path, dst: &Path, link_type: LinkType) -> Result<LinkOutcome> {
        match link_type {
            LinkType::Hardlink => match self.hardlink_on_dest(src, dst)? {
                Some(outcome) => Ok(outcome),
                None => self.hardlink(src, dst),
            },
            LinkType::Copy => self.copy(src, dst),
            LinkType::Symlink | LinkType::AbspathSymlink => {
                if symlink_metadata(src).is_some_and(|m| m.file_type().is_symlink()) {
                    self.copy(src, dst)
                } else {
                    self.symlink(src, dst, link_type == LinkType::Symlink)
                }
            }
            LinkType::HardlinkOrCopy => {
                if let Some(outcome) = self.hardlink_on_dest(src, dst)? {
                    return Ok(outcome);
                }
                let src_dev = fs::metadata(src).map_err(|e| Error::io_path(src, e))?.dev();
                let dst_dir = dst.parent().unwrap_or(Path::new("."));
                let dst_dev = fs::metadata(dst_dir)
                    .map_err(|e| Error::io_path(dst_dir, e))?
                    .dev();
                if src_dev == dst_dev {
                    self.hardlink(src, dst)
                } else {
                    self.copy(src, dst)
                }
            }
        }
    }

    /// Place `src` at `dst`, recursing into directories
    ///
    /// Conflicts are returned as [`LinkOutcome::Conflict`]; for a directory
    /// the first conflicting entry is reported.
    pub fn place(&self, src: &Path, dst: &Path, link_type: LinkType) -> Result<LinkOutcome> {
        let meta = fs::symlink_metadata(src).map_err(|e| Error::io_path(src, e))?;
        if !meta.is_dir() {
            return self.link_file(src, dst, link_type);
        }

        if dst.is_file() {
            return Ok(LinkOutcome::Conflict(
                "file exists where a directory is expected".to_string(),
            ));
        }
        let created = !dst.exists();
        if created {
            fs::create_dir_all(dst).map_err(|e| Error::io_path(dst, e))?;
        }
        fs::set_permissions(dst, meta.permissions()).map_err(|e| Error::io_path(dst, e))?;

        let mut entries: Vec<_> = fs::read_dir(src)
            .map_err(|e| Error::io_path(src, e))?
            .collect::<std::io::Result<_>>()
            .map_err(|e| Error::io_path(src, e))?;
        entries.sort_by_key(|e| e.file_name());

        let mut outcome = if created {
            LinkOutcome::Created
        } else {
            LinkOutcome::AlreadyPresent
        };
        for entry in entries {
            match self.place(&entry.path(), &dst.join(entry.file_name()), link_type)? {
                LinkOutcome::Conflict(reason) => {
                    return Ok(LinkOutcome::Conflict(format!(
                        "{}: {}",
                        dst.join(entry.file_name()).display(),
                        reason
                    )));
                }
                LinkOutcome::Created => outcome = LinkOutcome::Created,
                LinkOutcome::AlreadyPresent => {}
            }
        }
        Ok(outcome)
    }

    /// [`Self::place`] with conflicts turned into errors
    pub fn link(&self, src: &Path, dst: &Path, link_type: LinkType) -> Result<LinkOutcome> {
        self.place(src, dst, link_type)?.into_result(dst)
    }
}

fn poisoned(what: &str) -> Error {
    Error::Worker {
        pool: "linker".to_string(),
        reason: format!("{} lock poisoned", what),
    }
}

/// Copy a regular file keeping permissions and modification time
pub fn copy_preserving_mtime(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst).map_err(|e| Error::io_path(dst, e))?;
    let mtime = fs::metadata(src)
        .and_then(|m| m.modified())
        .map_err(|e| Error::io_path(src, e))?;
    fs::File::options()
        .write(true)
        .open(dst)
        .and_then(|f| f.set_modified(mtime))
        .map_err(|e| Error::io_path(dst, e))
}

/// Copy the contents of `src` into `dst`, like `cp -a src/* dst/`
pub fn copy_dir_contents(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).map_err(|e| Error::io_path(dst, e))?;
    let linker = Linker::new();
    for entry in fs::read_dir(src).map_err(|e| Error::io_path(src, e))? {
        let entry = entry.map_err(|e| Error::io_path(src, e))?;
        linker.link(&entry.path(), &dst.join(entry.file_name()), LinkType::Copy)?;
    }
    Ok(())
}

/// Copy `src` over `dst` like `cp -a --remove-destination src/* dst/`
pub fn copy_tree_replacing(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).map_err(|e| Error::io_path(dst, e))?;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(|e| Error::io_path(src, e.into()))?;
        let rel = entry.path().strip_prefix(src).map_err(|_| {
            Error::InvalidValue(format!("{} is outside {}", entry.path().display(), src.display()))
        })?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| Error::io_path(&target, e))?;
            continue;
        }
        if fs::symlink_metadata(&target).is_ok() {
            fs::remove_file(&target).map_err(|e| Error::io_path(&target, e))?;
        }
        if entry.path_is_symlink() {
            let link = fs::read_link(entry.path()).map_err(|e| Error::io_path(entry.path(), e))?;
            std::os::unix::fs::symlink(&link, &target).map_err(|e| Error::io_path(&target, e))?;
        } else {
            copy_preserving_mtime(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Links (src, dst) pairs on a worker pool sharing one [`Linker`]
pub struct LinkerPool {
    pub link_type: LinkType,
    pub linker: Arc<Linker>,
    pool: WorkerPool<(PathBuf, PathBuf)>,
}

impl LinkerPool {
    pub fn new(link_type: LinkType, workers: usize) -> Self {
        Self {
            link_type,
            linker: Arc::new(Linker::new()),
            pool: WorkerPool::new("linker", workers),
        }
    }

    pub fn queue_put(&mut self, src: PathBuf, dst: PathBuf) {
        self.pool.queue_put((src, dst));
    }

    pub fn start(&mut self) -> Result<()> {
        let linker = self.linker.clone();
        let link_type = self.link_type;
        let total = self.pool.queue_total();
        self.pool.start(move |(src, dst), num| {
            if num % 100 == 0 || num == total {
                debug!("Linked {} out of {} packages", num, total);
            }
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::io_path(parent, e))?;
            }
            linker.link(src, dst, link_type).map(|_| ())
        })
    }

    pub fn stop(&mut self) -> Result<()> {
        self.pool.stop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_link_type_names() {
        assert_eq!(LinkType::from_str("hardlink-or-copy").unwrap(), LinkType::HardlinkOrCopy);
        assert_eq!(LinkType::AbspathSymlink.to_string(), "abspath-symlink");
        assert!(LinkType::from_str("reflink").is_err());
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(
            relative_path(Path::new("/c/Server/x86_64/iso/boot.iso"), Path::new("/c/Server/x86_64/os/images")),
            PathBuf::from("../../iso/boot.iso")
        );
        assert_eq!(relative_path(Path::new("/a/b"), Path::new("/a")), PathBuf::from("b"));
    }

    #[test]
    fn test_hardlink_then_identical_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src/pkg.rpm");
        let dst = tmp.path().join("dst/pkg.rpm");
        write(&src, "payload");
        fs::create_dir_all(dst.parent().unwrap()).unwrap();

        let linker = Linker::new();
        assert_eq!(linker.link(&src, &dst, LinkType::Hardlink).unwrap(), LinkOutcome::Created);
        assert_eq!(
            fs::metadata(&src).unwrap().ino(),
            fs::metadata(&dst).unwrap().ino()
        );
        assert_eq!(
            linker.link(&src, &dst, LinkType::Hardlink).unwrap(),
            LinkOutcome::AlreadyPresent
        );
    }

    #[test]
    fn test_copy_preserves_mtime_and_rejects_different_file() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("a.rpm");
        let dst = tmp.path().join("out/a.rpm");
        write(&src, "one");
        fs::create_dir_all(dst.parent().unwrap()).unwrap();

        let linker = Linker::new();
        assert_eq!(linker.copy(&src, &dst).unwrap(), LinkOutcome::Created);
        assert_eq!(
            fs::metadata(&src).unwrap().mtime(),
            fs::metadata(&dst).unwrap().mtime()
        );
        assert_ne!(fs::metadata(&src).unwrap().ino(), fs::metadata(&dst).unwrap().ino());
        assert_eq!(linker.copy(&src, &dst).unwrap(), LinkOutcome::AlreadyPresent);

        let other = tmp.path().join("b/a.rpm");
        write(&other, "different size");
        assert!(matches!(linker.place(&other, &dst, LinkType::Copy).unwrap(), LinkOutcome::Conflict(_)));
        match linker.link(&other, &dst, LinkType::Copy) {
            Err(Error::LinkConflict { dst: d, .. }) => assert_eq!(d, dst),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_symlink_modes() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("iso/boot.iso");
        let dst = tmp.path().join("os/images/boot.iso");
        write(&src, "iso");
        fs::create_dir_all(dst.parent().unwrap()).unwrap();

        let linker = Linker::new();
        linker.link(&src, &dst, LinkType::Symlink).unwrap();
        assert_eq!(fs::read_link(&dst).unwrap(), PathBuf::from("../../iso/boot.iso"));
        assert_eq!(linker.link(&src, &dst, LinkType::Symlink).unwrap(), LinkOutcome::AlreadyPresent);

        let abs = tmp.path().join("os/images/abs.iso");
        linker.link(&src, &abs, LinkType::AbspathSymlink).unwrap();
        assert_eq!(fs::read_link(&abs).unwrap(), src);
    }

    #[test]
    fn test_directory_recursion_and_precache() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("tree");
        write(&src.join("images/install.img"), "img");
        write(&src.join("isolinux/vmlinuz"), "kernel");
        let dst = tmp.path().join("compose/os");

        let linker = Linker::new();
        linker.link(&src, &dst, LinkType::HardlinkOrCopy).unwrap();
        assert!(dst.join("images/install.img").is_file());
        assert!(dst.join("isolinux/vmlinuz").is_file());

        // the same content via another source path is hardlinked from the cache
        linker.scan(&dst).unwrap();
        let copy_src = tmp.path().join("elsewhere/vmlinuz");
        fs::create_dir_all(copy_src.parent().unwrap()).unwrap();
        copy_preserving_mtime(&src.join("isolinux/vmlinuz"), &copy_src).unwrap();
        let second = tmp.path().join("compose/other/vmlinuz");
        fs::create_dir_all(second.parent().unwrap()).unwrap();
        linker.link(&copy_src, &second, LinkType::Hardlink).unwrap();
        assert_eq!(
            fs::metadata(&second).unwrap().ino(),
            fs::metadata(dst.join("isolinux/vmlinuz")).unwrap().ino()
        );
    }

    #[test]
    fn test_linker_pool() {
        let tmp = tempfile::tempdir().unwrap();
        let mut pool = LinkerPool::new(LinkType::Copy, 4);
        for i in 0..20 {
            let src = tmp.path().join(format!("src/p{}.rpm", i));
            write(&src, &format!("package {}", i));
            pool.queue_put(src, tmp.path().join(format!("dst/Packages/p{}.rpm", i)));
        }
        pool.start().unwrap();
        pool.stop().unwrap();
        assert_eq!(fs::read_dir(tmp.path().join("dst/Packages")).unwrap().count(), 20);
    }

    #[test]
    fn test_copy_tree_replacing_overwrites() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("isolinux")).unwrap();
        fs::write(src.join("isolinux/isolinux.cfg"), "new").unwrap();
        std::os::unix::fs::symlink("isolinux/isolinux.cfg", src.join("link")).unwrap();

        let dst = tmp.path().join("dst");
        fs::create_dir_all(dst.join("isolinux")).unwrap();
        fs::write(dst.join("isolinux/isolinux.cfg"), "old content").unwrap();
        fs::write(dst.join("keep"), "keep").unwrap();

        copy_tree_replacing(&src, &dst).unwrap();
        assert_eq!(fs::read_to_string(dst.join("isolinux/isolinux.cfg")).unwrap(), "new");
        assert_eq!(fs::read_link(dst.join("link")).unwrap(), Path::new("isolinux/isolinux.cfg"));
        assert_eq!(fs::read_to_string(dst.join("keep")).unwrap(), "keep");
    }
}
