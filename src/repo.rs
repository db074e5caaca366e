//! The repository handle: metadata-directory discovery, initialization of
//! the on-disk layout, the advisory write lock, and the file-hashing
//! helpers every operation shares.
//!
//! All state lives on disk; a `Repo` only caches the workdir paths, the
//! parsed config and the hash kind. Operations reconstruct their view from
//! disk each time, so handles stay cheap and never go stale across
//! processes.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use tracing::info;

use crate::{
    config::Config,
    errors::WitError,
    hash::{HashKind, ObjectHash},
    internal::{
        chunk::{self, ChunkerParams, LargeFiles},
        index::Index,
        object::{tree::TreeItemMode, types::ObjectType},
        store::Store,
    },
};

/// Name of the metadata directory.
pub const WIT_DIR: &str = ".wit";

/// Branch created by `init`.
pub const DEFAULT_BRANCH: &str = "main";

const LOCK_FILE: &str = "wit.lock";

/// An open repository.
pub struct Repo {
    workdir: PathBuf,
    wit_dir: PathBuf,
    config: Config,
    kind: HashKind,
}

impl Repo {
    /// Create a fresh repository at `workdir` with the chosen algorithm.
    pub fn init(workdir: impl Into<PathBuf>, kind: HashKind) -> Result<Repo, WitError> {
        let workdir = workdir.into();
        let wit_dir = workdir.join(WIT_DIR);
        if wit_dir.exists() {
            return Err(WitError::AlreadyInitialized(workdir));
        }

        for sub in [
            "objects",
            "refs/heads",
            "refs/tags",
            "info",
            "journal",
            "large-files",
            "stash",
        ] {
            fs::create_dir_all(wit_dir.join(sub))?;
        }
        fs::write(
            wit_dir.join("HEAD"),
            format!("ref: refs/heads/{DEFAULT_BRANCH}\n"),
        )?;
        fs::write(
            wit_dir.join("description"),
            "Unnamed repository; edit this file to name the repository.\n",
        )?;
        fs::write(wit_dir.join("info/exclude"), "")?;
        Config::initial(kind).save(&wit_dir.join("config"))?;

        info!(target: "wit::repo", path = %workdir.display(), algorithm = %kind, "repository initialized");
        Repo::open(workdir)
    }

    /// Open the repository whose workdir is exactly `workdir`.
    pub fn open(workdir: impl Into<PathBuf>) -> Result<Repo, WitError> {
        let workdir = workdir.into();
        let wit_dir = workdir.join(WIT_DIR);
        if !wit_dir.is_dir() {
            return Err(WitError::NotARepository(workdir));
        }
        let config = Config::load(&wit_dir.join("config"))?;
        let kind = config.hash_algorithm()?;
        Ok(Repo {
            workdir,
            wit_dir,
            config,
            kind,
        })
    }

    /// Walk upward from `start` until a metadata directory appears.
    pub fn find(start: impl AsRef<Path>) -> Result<Repo, WitError> {
        let start = start.as_ref();
        let mut cursor = Some(start.to_path_buf());
        while let Some(dir) = cursor {
            if dir.join(WIT_DIR).is_dir() {
                return Repo::open(dir);
            }
            cursor = dir.parent().map(|p| p.to_path_buf());
        }
        Err(WitError::NotARepository(start.to_path_buf()))
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn wit_dir(&self) -> &Path {
        &self.wit_dir
    }

    pub fn kind(&self) -> HashKind {
        self.kind
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Rewrite the config file (used by init-time knobs and tests).
    pub fn set_config(&mut self, config: Config) -> Result<(), WitError> {
        config.save(&self.wit_dir.join("config"))?;
        self.kind = config.hash_algorithm()?;
        self.config = config;
        Ok(())
    }

    pub fn store(&self) -> Store {
        Store::new(self.wit_dir.join("objects"), self.kind)
    }

    pub fn large_files(&self) -> LargeFiles {
        LargeFiles::new(self.wit_dir.join("large-files"))
    }

    pub fn index_path(&self) -> PathBuf {
        self.wit_dir.join("index")
    }

    pub fn load_index(&self) -> Result<Index, WitError> {
        Index::load(&self.index_path(), self.kind)
    }

    pub fn save_index(&self, index: &Index) -> Result<(), WitError> {
        index.save(&self.index_path())
    }

    /// Digest of the index file bytes, used by journal snapshots. The zero
    /// hash stands in when no index has been written yet.
    pub fn index_checksum(&self) -> Result<ObjectHash, WitError> {
        match fs::read(self.index_path()) {
            Ok(bytes) => Ok(ObjectHash::new(self.kind, &bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(ObjectHash::zero(self.kind))
            }
            Err(e) => Err(WitError::IOError(e)),
        }
    }

    pub fn merge_state_path(&self) -> PathBuf {
        self.wit_dir.join("merge-state")
    }

    pub fn cherry_pick_state_path(&self) -> PathBuf {
        self.wit_dir.join("cherry-pick-state")
    }

    pub fn journal_dir(&self) -> PathBuf {
        self.wit_dir.join("journal")
    }

    pub fn stash_dir(&self) -> PathBuf {
        self.wit_dir.join("stash")
    }

    pub fn migration_map_path(&self) -> PathBuf {
        self.wit_dir.join("migration-map")
    }

    pub fn chunker_params(&self) -> ChunkerParams {
        ChunkerParams::default()
    }

    pub fn large_file_threshold(&self) -> u64 {
        self.config.large_file_threshold()
    }

    /// Acquire the repository-wide advisory write lock. Dropping the guard
    /// releases it on every exit path.
    pub fn lock(&self) -> Result<RepoLock, WitError> {
        let path = self.wit_dir.join(LOCK_FILE);
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                Ok(RepoLock { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(WitError::Locked(path))
            }
            Err(e) => Err(WitError::IOError(e)),
        }
    }

    /// File mode of a worktree path as a tree entry mode.
    pub fn file_mode(&self, path: &Path) -> Result<TreeItemMode, WitError> {
        let meta = fs::symlink_metadata(path)?;
        if meta.file_type().is_symlink() {
            return Ok(TreeItemMode::Link);
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if meta.permissions().mode() & 0o111 != 0 {
                return Ok(TreeItemMode::BlobExecutable);
            }
        }
        Ok(TreeItemMode::Blob)
    }

    /// Store a worktree file as a blob, chunking past the threshold.
    /// Returns `(id, mode, size)`.
    pub fn write_file_to_store(
        &self,
        path: &Path,
    ) -> Result<(ObjectHash, TreeItemMode, u64), WitError> {
        let store = self.store();
        let mode = self.file_mode(path)?;
        if mode == TreeItemMode::Link {
            let target = fs::read_link(path)?;
            let bytes = target.to_string_lossy().into_owned().into_bytes();
            let id = store.put_raw(ObjectType::Blob, &bytes)?;
            return Ok((id, mode, bytes.len() as u64));
        }

        let meta = fs::metadata(path)?;
        let size = meta.len();
        let mut file = fs::File::open(path)?;
        let id = if size > self.large_file_threshold() {
            chunk::write_chunked(
                &store,
                &self.large_files(),
                self.chunker_params(),
                &mut file,
            )?
        } else {
            store.put_stream(ObjectType::Blob, size, &mut file)?
        };
        Ok((id, mode, size))
    }

    /// The id a worktree file would be stored under, without writing.
    /// Chunking-aware, so it agrees with `write_file_to_store` above and
    /// below the threshold alike.
    pub fn hash_file_as_stored(&self, path: &Path) -> Result<ObjectHash, WitError> {
        let meta = fs::symlink_metadata(path)?;
        if meta.file_type().is_symlink() {
            let target = fs::read_link(path)?;
            let bytes = target.to_string_lossy().into_owned().into_bytes();
            return Ok(ObjectHash::from_type_and_data(
                self.kind,
                ObjectType::Blob,
                &bytes,
            ));
        }
        let size = meta.len();
        let mut file = fs::File::open(path)?;
        if size > self.large_file_threshold() {
            chunk::hash_chunked(self.kind, self.chunker_params(), &mut file)
        } else {
            let mut hasher = crate::utils::HashWriter::for_object(
                self.kind,
                ObjectType::Blob.to_bytes(),
                size as usize,
            );
            std::io::copy(&mut file, &mut hasher)?;
            Ok(hasher.finalize_hash())
        }
    }

    /// Reassembled bytes of a stored blob (manifest-transparent).
    pub fn read_blob(&self, id: &ObjectHash) -> Result<Vec<u8>, WitError> {
        chunk::read_blob_bytes(&self.store(), &self.large_files(), id)
    }
}

/// RAII guard over the repository lock file.
pub struct RepoLock {
    path: PathBuf,
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// init creates the documented layout; re-init fails.
    #[test]
    fn test_init_layout() {
        let dir = tempfile::TempDir::new().unwrap();
        let repo = Repo::init(dir.path(), HashKind::Sha256).unwrap();
        for sub in ["objects", "refs/heads", "refs/tags", "journal", "large-files"] {
            assert!(repo.wit_dir().join(sub).is_dir(), "{sub} missing");
        }
        assert_eq!(
            fs::read_to_string(repo.wit_dir().join("HEAD")).unwrap(),
            "ref: refs/heads/main\n"
        );
        assert_eq!(repo.kind(), HashKind::Sha256);

        assert!(matches!(
            Repo::init(dir.path(), HashKind::Sha256),
            Err(WitError::AlreadyInitialized(_))
        ));
    }

    /// find walks up from nested directories.
    #[test]
    fn test_find_walks_up() {
        let dir = tempfile::TempDir::new().unwrap();
        Repo::init(dir.path(), HashKind::Sha1).unwrap();
        let nested = dir.path().join("a/b/c");
        fs::create_dir_all(&nested).unwrap();
        let repo = Repo::find(&nested).unwrap();
        assert_eq!(repo.workdir(), dir.path());

        let outside = tempfile::TempDir::new().unwrap();
        assert!(matches!(
            Repo::find(outside.path()),
            Err(WitError::NotARepository(_))
        ));
    }

    /// The lock is exclusive and released on drop.
    #[test]
    fn test_lock_exclusive_and_released() {
        let dir = tempfile::TempDir::new().unwrap();
        let repo = Repo::init(dir.path(), HashKind::Sha256).unwrap();

        let guard = repo.lock().unwrap();
        assert!(matches!(repo.lock(), Err(WitError::Locked(_))));
        drop(guard);
        assert!(repo.lock().is_ok());
    }

    /// File hashing agrees with storing, for plain and chunk-sized files.
    #[test]
    fn test_hash_file_agrees_with_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let repo = Repo::init(dir.path(), HashKind::Sha256).unwrap();
        let file = dir.path().join("data.bin");
        fs::write(&file, b"some plain file contents").unwrap();

        let predicted = repo.hash_file_as_stored(&file).unwrap();
        let (stored, mode, size) = repo.write_file_to_store(&file).unwrap();
        assert_eq!(predicted, stored);
        assert_eq!(mode, TreeItemMode::Blob);
        assert_eq!(size, 24);
        assert_eq!(repo.read_blob(&stored).unwrap(), b"some plain file contents");
    }
}
