//! Scanning a local build folder into the list of objects to upload.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use adler::Adler32;
use tracing::{debug, warn};

use crate::error::{ConfigError, ConfigResult};

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

const CONTENT_TYPES: &[(&str, &str)] = &[
    ("html", "text/html"),
    ("htm", "text/html"),
    ("css", "text/css"),
    ("js", "text/javascript"),
    ("mjs", "text/javascript"),
    ("json", "application/json"),
    ("map", "application/json"),
    ("txt", "text/plain"),
    ("xml", "application/xml"),
    ("svg", "image/svg+xml"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("ico", "image/x-icon"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("ttf", "font/ttf"),
    ("wasm", "application/wasm"),
    ("pdf", "application/pdf"),
    ("webmanifest", "application/manifest+json"),
];

pub fn content_type_for(path: &Path) -> &'static str {
    let ext = match path.extension().and_then(|e| e.to_str()) {
        Some(e) => e.to_ascii_lowercase(),
        None => return DEFAULT_CONTENT_TYPE,
    };
    CONTENT_TYPES.iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, ty)| *ty)
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetFile {
    /// object key, relative to the asset root, always `/` separated.
    pub key: String,
    pub path: PathBuf,
    pub size: u64,
    pub content_type: &'static str,
    pub checksum: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetManifest {
    pub root: PathBuf,
    /// sorted by key.
    pub files: Vec<AssetFile>,
    /// adler32 over every key and file content, in key order.
    pub fingerprint: u32,
}

/// symlinks are followed. `visited` holds the canonical path of every
/// directory walked so far, so a link back up the tree is only walked once.
fn iter_files_recursively(
    start_dir: &Path,
    visited: &mut BTreeSet<PathBuf>,
    callback: &mut impl FnMut(PathBuf) -> ConfigResult<()>,
) -> ConfigResult<()> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ConfigError::Io { path, source }
    };
    let canonical = std::fs::canonicalize(start_dir).map_err(io_err(start_dir))?;
    if !visited.insert(canonical) {
        warn!(path = %start_dir.display(), "directory was already scanned, skipping");
        return Ok(());
    }
    let readdir = std::fs::read_dir(start_dir).map_err(io_err(start_dir))?;
    for entry in readdir {
        let direntry = entry.map_err(io_err(start_dir))?;
        let path = direntry.path();
        let mut fp = direntry.file_type().map_err(io_err(&path))?;
        if fp.is_symlink() {
            match std::fs::metadata(&path) {
                Ok(target) => fp = target.file_type(),
                Err(e) => {
                    warn!(path = %path.display(), "skipping broken symlink: {e}");
                    continue;
                }
            }
        }
        if fp.is_dir() {
            iter_files_recursively(&path, visited, callback)?;
        } else {
            callback(path)?;
        }
    }
    Ok(())
}

fn object_key(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

impl AssetManifest {
    pub fn scan<P: AsRef<Path>>(root: P) -> ConfigResult<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(ConfigError::AssetPathNotFound(root.to_path_buf()));
        }
        let mut files = vec![];
        iter_files_recursively(root, &mut BTreeSet::new(), &mut |path| {
            let contents = std::fs::read(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            files.push(AssetFile {
                key: object_key(root, &path),
                size: contents.len() as u64,
                content_type: content_type_for(&path),
                checksum: adler::adler32_slice(&contents),
                path,
            });
            Ok(())
        })?;
        files.sort_by(|a, b| a.key.cmp(&b.key));

        let mut hasher = Adler32::new();
        for file in files.iter() {
            hasher.write_slice(file.key.as_bytes());
            hasher.write_slice(&file.checksum.to_be_bytes());
        }
        let fingerprint = hasher.checksum();
        debug!(root = %root.display(), files = files.len(), fingerprint, "scanned assets");
        Ok(Self { root: root.to_path_buf(), files, fingerprint })
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.files.binary_search_by(|f| f.key.as_str().cmp(key)).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn site_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("static/css")).unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>hello</h1>").unwrap();
        std::fs::write(dir.path().join("static/css/site.css"), "body {}").unwrap();
        std::fs::write(dir.path().join("static/app.JS"), "console.log(1)").unwrap();
        std::fs::write(dir.path().join("LICENSE"), "mit").unwrap();
        dir
    }

    #[test]
    fn scan_lists_files_with_slash_keys() {
        let dir = site_dir();
        let manifest = AssetManifest::scan(dir.path()).unwrap();
        let keys: Vec<_> = manifest.files.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["LICENSE", "index.html", "static/app.JS", "static/css/site.css"]);
        let types: Vec<_> = manifest.files.iter().map(|f| f.content_type).collect();
        assert_eq!(types, vec![DEFAULT_CONTENT_TYPE, "text/html", "text/javascript", "text/css"]);
        assert_eq!(manifest.total_size(), 3 + 14 + 14 + 7);
        assert!(manifest.contains_key("static/css/site.css"));
        assert!(!manifest.contains_key("static/css"));
    }

    #[test]
    fn fingerprint_tracks_contents() {
        let dir = site_dir();
        let first = AssetManifest::scan(dir.path()).unwrap();
        assert_eq!(first.fingerprint, AssetManifest::scan(dir.path()).unwrap().fingerprint);
        std::fs::write(dir.path().join("index.html"), "<h1>changed</h1>").unwrap();
        let second = AssetManifest::scan(dir.path()).unwrap();
        assert_ne!(first.fingerprint, second.fingerprint);
    }

    #[test]
    fn missing_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = AssetManifest::scan(dir.path().join("dist")).unwrap_err();
        assert!(matches!(err, ConfigError::AssetPathNotFound(_)));
        let file = dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(matches!(AssetManifest::scan(&file), Err(ConfigError::AssetPathNotFound(_))));
    }

    #[test]
    fn empty_directory_has_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = AssetManifest::scan(dir.path()).unwrap();
        assert!(manifest.files.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directories_are_followed() {
        let dir = site_dir();
        let shared = tempfile::tempdir().unwrap();
        std::fs::write(shared.path().join("logo.svg"), "<svg/>").unwrap();
        std::os::unix::fs::symlink(shared.path(), dir.path().join("shared")).unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("loop")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("gone"), dir.path().join("broken")).unwrap();

        let manifest = AssetManifest::scan(dir.path()).unwrap();
        assert!(manifest.contains_key("shared/logo.svg"));
        assert!(!manifest.files.iter().any(|f| f.key.starts_with("loop/") || f.key == "broken"));
        let logo = manifest.files.iter().find(|f| f.key == "shared/logo.svg").unwrap();
        assert_eq!(logo.content_type, "image/svg+xml");
        assert_eq!(logo.size, 6);
    }
}
