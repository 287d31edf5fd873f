/// File-system access for the ingestion state machine.
///
/// Discovery, reads and relocation go through [`ReportStore`] so the state
/// machine can run against an in-memory store in tests.
use std::io;
use std::path::{Path, PathBuf};

pub trait ReportStore {
    /// Regular files directly inside `dir` whose name starts with `prefix`,
    /// sorted by path.
    fn discover(&self, dir: &Path, prefix: &str) -> io::Result<Vec<PathBuf>>;

    /// Full report text. Invalid UTF-8 is replaced rather than rejected.
    fn read(&self, path: &Path) -> io::Result<String>;

    /// Move `path` into `dest_dir` (created if missing), keeping its file
    /// name. Returns the new path. Either the file ends up entirely at the
    /// destination or stays where it was.
    fn relocate(&self, path: &Path, dest_dir: &Path) -> io::Result<PathBuf>;
}

/// The real file system. Relocation is a single `rename`, which is atomic
/// as long as the destination is on the same file system (a subdirectory of
/// the search directory always is).
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskStore;

impl ReportStore for DiskStore {
    fn discover(&self, dir: &Path, prefix: &str) -> io::Result<Vec<PathBuf>> {
        // read_dir first so a missing directory is an error, not an empty match.
        std::fs::read_dir(dir)?;

        let pattern = format!(
            "{}/{}*",
            glob::Pattern::escape(&dir.to_string_lossy()),
            glob::Pattern::escape(prefix)
        );
        let paths = glob::glob(&pattern)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let mut found = Vec::new();
        for entry in paths {
            match entry {
                Ok(path) if path.is_file() => found.push(path),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable directory entry");
                }
            }
        }
        found.sort();
        Ok(found)
    }

    fn read(&self, path: &Path) -> io::Result<String> {
        let bytes = std::fs::read(path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn relocate(&self, path: &Path, dest_dir: &Path) -> io::Result<PathBuf> {
        let name = path.file_name().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has no file name", path.display()),
            )
        })?;
        std::fs::create_dir_all(dest_dir)?;

        let dest = dest_dir.join(name);
        if dest.exists() {
            tracing::warn!(
                file = %path.display(),
                dest = %dest.display(),
                "destination already exists, replacing"
            );
        }
        std::fs::rename(path, &dest)?;
        Ok(dest)
    }
}
