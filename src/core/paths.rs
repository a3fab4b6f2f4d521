//! Home-directory layout and path normalization for worker roots.

use std::env;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use crate::core::errors::{FslError, Result};

/// Directory name created under `$HOME` for daemon state.
pub const HOME_DIR_NAME: &str = ".fsledger";

/// Subdirectory of the home dir holding the local chain replica.
pub const CHAIN_DIR_NAME: &str = "chain";

/// Resolve the daemon home directory (`$HOME/.fsledger`).
///
/// Falls back to the system temp dir when `HOME` is unset, with a warning,
/// the same way the configuration defaults do.
pub fn default_home_dir() -> PathBuf {
    let home = env::var_os("HOME").map_or_else(
        || {
            eprintln!("[FSL-CONFIG] WARNING: HOME not set, falling back to temp dir for state");
            env::temp_dir()
        },
        PathBuf::from,
    );
    home.join(HOME_DIR_NAME)
}

/// Resolve a worker root to an absolute, normalized path.
///
/// Existing paths are canonicalized (symlinks resolved). Paths that do not
/// exist yet are made absolute against the CWD and normalized syntactically,
/// so a worker can be registered before its root is mounted.
pub fn resolve_root_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };

    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return canonical;
    }

    normalize_syntactic(&absolute)
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}

/// Whether `path` equals or lies beneath any of `ignored`.
pub fn is_ignored(path: &Path, ignored: &[PathBuf]) -> bool {
    ignored.iter().any(|prefix| path.starts_with(prefix))
}

/// Hidden sibling used as the staging file for [`write_atomic`].
pub fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(String::new, |name| name.to_string_lossy().into_owned());
    path.with_file_name(format!(".{name}.tmp"))
}

/// Replace `path` with `bytes` by writing a hidden temp file and renaming it
/// into place. Readers never observe a partially written file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = staging_path(path);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| FslError::io(parent, e))?;
    }

    let result = (|| {
        {
            let mut opts = OpenOptions::new();
            opts.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                opts.mode(0o644);
            }
            let mut file = opts.open(&tmp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)
    })();

    if let Err(source) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(FslError::io(path, source));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_root_is_canonicalized() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = resolve_root_path(dir.path());
        assert_eq!(resolved, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn missing_root_is_normalized_syntactically() {
        let input = Path::new("/fsledger-missing-root/a/../b/./c");
        assert!(std::fs::canonicalize(input).is_err());
        assert_eq!(
            resolve_root_path(input),
            PathBuf::from("/fsledger-missing-root/b/c")
        );
    }

    #[test]
    fn ignore_matches_whole_components_only() {
        let ignored = vec![PathBuf::from("/data/cache")];
        assert!(is_ignored(Path::new("/data/cache"), &ignored));
        assert!(is_ignored(Path::new("/data/cache/x.bin"), &ignored));
        assert!(!is_ignored(Path::new("/data/cache2/x.bin"), &ignored));
    }

    #[test]
    fn atomic_write_replaces_and_leaves_no_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("3.json");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert!(!staging_path(&path).exists());
        assert_eq!(
            staging_path(&path).file_name().unwrap().to_string_lossy(),
            ".3.json.tmp"
        );
    }

    #[test]
    fn home_dir_ends_with_daemon_dir_name() {
        assert!(default_home_dir().ends_with(HOME_DIR_NAME));
    }
}
