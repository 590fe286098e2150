//! Directory traversal for backup snapshots.
//!
//! Unlike a plain file listing, the walk yields directories as well as files,
//! parents always before their children, so a tree can be assembled in one pass.

use crate::utils::errors::BackupError;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Follow symbolic links
    pub follow_links: bool,

    /// Maximum depth (None = unlimited)
    pub max_depth: Option<usize>,

    /// Entry names to skip; an excluded directory is pruned with its contents
    pub exclude_patterns: Vec<String>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            follow_links: false,
            max_depth: None,
            exclude_patterns: vec![
                ".git".to_string(),
                "node_modules".to_string(),
                ".DS_Store".to_string(),
            ],
        }
    }
}

/// An entry discovered during walking
#[derive(Debug, Clone)]
pub struct EntryInfo {
    /// Full path to the entry
    pub path: PathBuf,

    /// Relative path from the root
    pub relative_path: PathBuf,

    /// Relative path joined with `/`; exact, every component is valid UTF-8
    pub relative_key: String,

    /// File name
    pub name: String,

    /// Size in bytes (0 for directories)
    pub size: u64,

    /// Is this a directory?
    pub is_dir: bool,
}

impl EntryInfo {
    /// Build from a DirEntry.
    /// Symlinks resolve to their target file; symlinked directories and broken links yield None.
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Option<Self>> {
        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        let (Some(relative_key), Some(name)) = (utf8_key(&relative_path), entry.file_name().to_str())
        else {
            return Ok(None);
        };
        let name = name.to_string();

        let (size, is_dir) = if entry.path_is_symlink() && !entry.file_type().is_dir() {
            match std::fs::metadata(&path) {
                Ok(resolved) if resolved.is_dir() => return Ok(None),
                Ok(resolved) => (resolved.len(), false),
                Err(_) => return Ok(None),
            }
        } else {
            let metadata = entry.metadata()?;
            if metadata.is_dir() {
                (0, true)
            } else {
                (metadata.len(), false)
            }
        };

        Ok(Some(Self {
            path,
            relative_path,
            relative_key,
            name,
            size,
            is_dir,
        }))
    }
}

/// Why an entry was left out of a walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Names are sent to the remote and used as cache keys as text; a lossy
    /// conversion could make two different entries look identical.
    NonUtf8Name,
    Unreadable(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NonUtf8Name => write!(f, "name is not valid UTF-8"),
            SkipReason::Unreadable(reason) => write!(f, "{}", reason),
        }
    }
}

/// An entry (with everything below it) that the walk could not include
#[derive(Debug, Clone)]
pub struct SkippedEntry {
    pub path: PathBuf,
    pub reason: SkipReason,
}

#[derive(Debug, Default)]
pub struct Walk {
    pub entries: Vec<EntryInfo>,
    pub skipped: Vec<SkippedEntry>,
}

/// Walk a directory tree and collect every file and directory below `root`.
///
/// The root itself is not returned. Siblings are sorted by name, and every
/// directory precedes its contents. Only a failure to read the root fails the
/// walk; anything unreadable further down is logged and reported in
/// [`Walk::skipped`].
///
/// # Example
/// ```no_run
/// use backup_sync::fs::walker::{walk_tree, WalkOptions};
/// use std::path::Path;
///
/// let walk = walk_tree(Path::new("/data"), &WalkOptions::default()).unwrap();
/// println!("Found {} entries", walk.entries.len());
/// ```
pub fn walk_tree(root: &Path, options: &WalkOptions) -> Result<Walk, BackupError> {
    let mut walk = Walk::default();
    let mut non_utf8 = Vec::new();

    let mut walker = WalkDir::new(root)
        .follow_links(options.follow_links)
        .sort_by_file_name()
        .min_depth(1);

    if let Some(max_depth) = options.max_depth {
        walker = walker.max_depth(max_depth);
    }

    let iter = walker.into_iter().filter_entry(|entry| {
        if should_exclude(entry, &options.exclude_patterns) {
            return false;
        }
        if entry.file_name().to_str().is_none() {
            non_utf8.push(entry.path().to_path_buf());
            return false;
        }
        true
    });

    for entry in iter {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => return Err(err.into()),
            Err(err) => {
                let path = err
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| root.to_path_buf());
                walk.skip(path, SkipReason::Unreadable(err.to_string()));
                continue;
            }
        };

        match EntryInfo::from_entry(&entry, root) {
            Ok(Some(info)) => walk.entries.push(info),
            Ok(None) => {}
            Err(err) => walk.skip(
                entry.path().to_path_buf(),
                SkipReason::Unreadable(err.to_string()),
            ),
        }
    }

    for path in non_utf8 {
        walk.skip(path, SkipReason::NonUtf8Name);
    }

    Ok(walk)
}

impl Walk {
    fn skip(&mut self, path: PathBuf, reason: SkipReason) {
        warn!("Skipping {}: {}", path.display(), reason);
        self.skipped.push(SkippedEntry { path, reason });
    }
}

/// `/`-joined relative path, or None if any component is not valid UTF-8
fn utf8_key(relative: &Path) -> Option<String> {
    let components = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(components.join("/"))
}

fn should_exclude(entry: &DirEntry, patterns: &[String]) -> bool {
    let file_name = entry.file_name();
    patterns.iter().any(|pattern| file_name == pattern.as_str())
}
