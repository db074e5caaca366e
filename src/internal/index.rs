//! The staging index: a binary table keyed by path with mode, stat data and
//! blob hash, plus the tree synthesis that turns the staged state into
//! stored tree objects.
//!
//! On-disk layout (all integers big-endian):
//!
//! ```text
//! magic "WIDX" | version u32 | hash-kind u8 | entry-count u32
//! per entry: mode u32 | stage u8 | mtime i64 | size u64 | hash bytes |
//!            path-len u16 | path bytes (POSIX separators, repo-relative)
//! trailer: digest over all preceding bytes under the repository hash
//! ```
//!
//! Entries are held sorted by `(path, stage)`. Stage 0 is the normal staged
//! entry; stages 1/2/3 hold base/ours/theirs during an unresolved conflict.
//! Persistence goes through a temp file and rename.

use std::{
    collections::BTreeMap,
    fs,
    io::{Cursor, Read, Write},
    path::Path,
};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::{
    errors::WitError,
    hash::{HashKind, ObjectHash},
    internal::{
        object::{
            ObjectTrait,
            tree::{Tree, TreeItem, TreeItemMode},
        },
        store::Store,
    },
    utils::HashWriter,
};

const INDEX_MAGIC: &[u8; 4] = b"WIDX";
const INDEX_VERSION: u32 = 1;

/// Conflict stage of an index entry.
pub const STAGE_NORMAL: u8 = 0;
pub const STAGE_BASE: u8 = 1;
pub const STAGE_OURS: u8 = 2;
pub const STAGE_THEIRS: u8 = 3;

/// One staged path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub path: String,
    pub mode: TreeItemMode,
    pub hash: ObjectHash,
    pub size: u64,
    pub mtime: i64,
    pub stage: u8,
}

impl IndexEntry {
    pub fn new(path: String, mode: TreeItemMode, hash: ObjectHash, size: u64, mtime: i64) -> Self {
        IndexEntry {
            path,
            mode,
            hash,
            size,
            mtime,
            stage: STAGE_NORMAL,
        }
    }

    /// Advisory fast-path check: matching size and mtime mean "unmodified"
    /// without rehashing. A mismatch only means the caller must rehash.
    pub fn stat_matches(&self, size: u64, mtime: i64) -> bool {
        self.size == size && self.mtime == mtime
    }
}

fn mode_to_u32(mode: TreeItemMode) -> u32 {
    match mode {
        TreeItemMode::Blob => 0o100644,
        TreeItemMode::BlobExecutable => 0o100755,
        TreeItemMode::Link => 0o120000,
        TreeItemMode::Tree => 0o040000,
    }
}

fn mode_from_u32(raw: u32) -> Result<TreeItemMode, WitError> {
    match raw {
        0o100644 => Ok(TreeItemMode::Blob),
        0o100755 => Ok(TreeItemMode::BlobExecutable),
        0o120000 => Ok(TreeItemMode::Link),
        0o040000 => Ok(TreeItemMode::Tree),
        _ => Err(WitError::MalformedObject(format!(
            "index entry mode {raw:o} unsupported"
        ))),
    }
}

/// The staging table. Keys are `(path, stage)` so conflict stages coexist
/// with nothing else at the same path.
pub struct Index {
    kind: HashKind,
    entries: BTreeMap<(String, u8), IndexEntry>,
}

impl Index {
    pub fn new(kind: HashKind) -> Index {
        Index {
            kind,
            entries: BTreeMap::new(),
        }
    }

    /// Load from disk; a missing file is an empty index. The trailing digest
    /// is verified so a torn or corrupted table surfaces as malformed
    /// instead of silently staging wrong state.
    pub fn load(path: &Path, kind: HashKind) -> Result<Index, WitError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Index::new(kind));
            }
            Err(e) => return Err(WitError::IOError(e)),
        };
        Self::from_bytes(&bytes, kind)
    }

    fn from_bytes(bytes: &[u8], kind: HashKind) -> Result<Index, WitError> {
        let malformed = |what: &str| WitError::MalformedObject(format!("index: {what}"));
        let digest_len = kind.size();
        if bytes.len() < INDEX_MAGIC.len() + 4 + 1 + 4 + digest_len {
            return Err(malformed("truncated header"));
        }

        let (payload, trailer) = bytes.split_at(bytes.len() - digest_len);
        let expected = ObjectHash::new(kind, payload);
        if expected.as_ref() != trailer {
            return Err(malformed("checksum mismatch"));
        }

        let mut cursor = Cursor::new(payload);
        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic)?;
        if &magic != INDEX_MAGIC {
            return Err(malformed("bad magic"));
        }
        let version = cursor.read_u32::<BigEndian>()?;
        if version != INDEX_VERSION {
            return Err(malformed(&format!("unsupported version {version}")));
        }
        let kind_tag = cursor.read_u8()?;
        let stored_kind = match kind_tag {
            1 => HashKind::Sha1,
            2 => HashKind::Sha256,
            _ => return Err(malformed("unknown hash kind")),
        };
        if stored_kind != kind {
            return Err(malformed("index hash kind does not match repository"));
        }
        let count = cursor.read_u32::<BigEndian>()?;

        let mut index = Index::new(kind);
        for _ in 0..count {
            let mode = mode_from_u32(cursor.read_u32::<BigEndian>()?)?;
            let stage = cursor.read_u8()?;
            let mtime = cursor.read_i64::<BigEndian>()?;
            let size = cursor.read_u64::<BigEndian>()?;
            let hash = ObjectHash::from_stream(kind, &mut cursor)?;
            let path_len = cursor.read_u16::<BigEndian>()? as usize;
            let mut path_bytes = vec![0u8; path_len];
            cursor.read_exact(&mut path_bytes)?;
            let path = String::from_utf8(path_bytes)
                .map_err(|_| malformed("entry path is not utf-8"))?;
            index.entries.insert(
                (path.clone(), stage),
                IndexEntry {
                    path,
                    mode,
                    hash,
                    size,
                    mtime,
                    stage,
                },
            );
        }
        Ok(index)
    }

    fn to_bytes(&self) -> Result<Vec<u8>, WitError> {
        let mut payload = Vec::new();
        payload.extend_from_slice(INDEX_MAGIC);
        payload.write_u32::<BigEndian>(INDEX_VERSION)?;
        payload.write_u8(match self.kind {
            HashKind::Sha1 => 1,
            HashKind::Sha256 => 2,
        })?;
        payload.write_u32::<BigEndian>(self.entries.len() as u32)?;
        for entry in self.entries.values() {
            payload.write_u32::<BigEndian>(mode_to_u32(entry.mode))?;
            payload.write_u8(entry.stage)?;
            payload.write_i64::<BigEndian>(entry.mtime)?;
            payload.write_u64::<BigEndian>(entry.size)?;
            payload.extend_from_slice(entry.hash.as_ref());
            payload.write_u16::<BigEndian>(entry.path.len() as u16)?;
            payload.extend_from_slice(entry.path.as_bytes());
        }
        let mut hasher = HashWriter::new(self.kind);
        hasher.update(&payload);
        payload.extend_from_slice(&hasher.finalize());
        Ok(payload)
    }

    /// Persist atomically: temp file in the same directory, then rename.
    pub fn save(&self, path: &Path) -> Result<(), WitError> {
        let bytes = self.to_bytes()?;
        let dir = path
            .parent()
            .ok_or_else(|| WitError::NotFound(format!("parent of {}", path.display())))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist(path).map_err(|e| WitError::IOError(e.error))?;
        Ok(())
    }

    pub fn kind(&self) -> HashKind {
        self.kind
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Stage-0 entry at a path.
    pub fn get(&self, path: &str) -> Option<&IndexEntry> {
        self.entries.get(&(path.to_string(), STAGE_NORMAL))
    }

    /// Insert or replace the stage-0 entry, clearing conflict stages.
    pub fn add_entry(&mut self, entry: IndexEntry) {
        self.clear_conflict(&entry.path);
        self.entries
            .insert((entry.path.clone(), STAGE_NORMAL), entry);
    }

    /// Remove every stage of a path. Returns whether anything was removed.
    pub fn remove(&mut self, path: &str) -> bool {
        let mut removed = false;
        for stage in [STAGE_NORMAL, STAGE_BASE, STAGE_OURS, STAGE_THEIRS] {
            removed |= self.entries.remove(&(path.to_string(), stage)).is_some();
        }
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// All entries in `(path, stage)` order.
    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.values()
    }

    /// Stage-0 entries only.
    pub fn staged(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries
            .values()
            .filter(|e| e.stage == STAGE_NORMAL)
    }

    /// Record an unresolved conflict: drop the stage-0 entry and store the
    /// present sides at their stages.
    pub fn set_conflict(
        &mut self,
        path: &str,
        base: Option<IndexEntry>,
        ours: Option<IndexEntry>,
        theirs: Option<IndexEntry>,
    ) {
        self.remove(path);
        for (stage, side) in [(STAGE_BASE, base), (STAGE_OURS, ours), (STAGE_THEIRS, theirs)] {
            if let Some(mut entry) = side {
                entry.stage = stage;
                entry.path = path.to_string();
                self.entries.insert((path.to_string(), stage), entry);
            }
        }
    }

    /// Drop conflict stages of a path, keeping any stage-0 entry.
    pub fn clear_conflict(&mut self, path: &str) {
        for stage in [STAGE_BASE, STAGE_OURS, STAGE_THEIRS] {
            self.entries.remove(&(path.to_string(), stage));
        }
    }

    /// Paths that still carry conflict stages.
    pub fn conflicted_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .entries
            .values()
            .filter(|e| e.stage != STAGE_NORMAL)
            .map(|e| e.path.clone())
            .collect();
        paths.dedup();
        paths
    }

    pub fn has_conflicts(&self) -> bool {
        self.entries.values().any(|e| e.stage != STAGE_NORMAL)
    }

    /// Synthesize tree objects bottom-up, one per directory prefix, and
    /// return the root tree id. Conflicted entries must be resolved first.
    pub fn commit_tree(&self, store: &Store) -> Result<ObjectHash, WitError> {
        if self.has_conflicts() {
            return Err(WitError::Conflict(self.conflicted_paths().len()));
        }

        enum Node {
            File(TreeItemMode, ObjectHash),
            Dir(BTreeMap<String, Node>),
        }

        let mut root: BTreeMap<String, Node> = BTreeMap::new();
        for entry in self.staged() {
            let mut cursor = &mut root;
            let parts: Vec<&str> = entry.path.split('/').collect();
            for (i, part) in parts.iter().enumerate() {
                if i + 1 == parts.len() {
                    cursor.insert(
                        part.to_string(),
                        Node::File(entry.mode, entry.hash),
                    );
                } else {
                    let next = cursor
                        .entry(part.to_string())
                        .or_insert_with(|| Node::Dir(BTreeMap::new()));
                    cursor = match next {
                        Node::Dir(map) => map,
                        Node::File(..) => {
                            return Err(WitError::MalformedObject(format!(
                                "path `{}` nests under a staged file",
                                entry.path
                            )));
                        }
                    };
                }
            }
        }

        fn build(
            store: &Store,
            kind: HashKind,
            nodes: &BTreeMap<String, Node>,
        ) -> Result<ObjectHash, WitError> {
            let mut items = Vec::with_capacity(nodes.len());
            for (name, node) in nodes {
                let item = match node {
                    Node::File(mode, hash) => TreeItem::new(*mode, *hash, name.clone()),
                    Node::Dir(children) => {
                        let sub_id = build(store, kind, children)?;
                        TreeItem::new(TreeItemMode::Tree, sub_id, name.clone())
                    }
                };
                items.push(item);
            }
            let tree = Tree::from_tree_items(kind, items)?;
            store.put_raw(tree.get_type(), &tree.to_data()?)
        }

        build(store, self.kind, &root)
    }

    /// Replace the table with the flattened contents of a stored tree.
    /// Stat fields start at zero, which forces a rehash on the next
    /// modification check until the worktree refreshes them.
    pub fn read_tree(&mut self, store: &Store, tree_id: &ObjectHash) -> Result<(), WitError> {
        self.clear();
        let mut stack: Vec<(String, ObjectHash)> = vec![(String::new(), *tree_id)];
        while let Some((prefix, id)) = stack.pop() {
            let tree = store.get(&id)?.into_tree()?;
            for item in tree.tree_items {
                let path = if prefix.is_empty() {
                    item.name.clone()
                } else {
                    format!("{prefix}/{}", item.name)
                };
                if item.mode.is_tree() {
                    stack.push((path, item.id));
                } else {
                    self.entries.insert(
                        (path.clone(), STAGE_NORMAL),
                        IndexEntry::new(path, item.mode, item.id, 0, 0),
                    );
                }
            }
        }
        Ok(())
    }

    /// Refresh stat columns from the worktree so subsequent modification
    /// checks take the fast path.
    pub fn refresh_stat(&mut self, workdir: &Path) {
        for entry in self.entries.values_mut() {
            let abs = workdir.join(&entry.path);
            if let Ok(meta) = fs::symlink_metadata(&abs) {
                entry.size = meta.len();
                entry.mtime = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::object::types::ObjectType;

    fn entry(kind: HashKind, path: &str, content: &[u8]) -> IndexEntry {
        IndexEntry::new(
            path.to_string(),
            TreeItemMode::Blob,
            ObjectHash::from_type_and_data(kind, ObjectType::Blob, content),
            content.len() as u64,
            1_700_000_000,
        )
    }

    /// Save and load reproduce the table exactly.
    #[test]
    fn test_index_round_trip() {
        let kind = HashKind::Sha256;
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("index");

        let mut index = Index::new(kind);
        index.add_entry(entry(kind, "src/lib.rs", b"lib"));
        index.add_entry(entry(kind, "README.md", b"readme"));
        index.save(&path).unwrap();

        let loaded = Index::load(&path, kind).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(
            loaded.get("src/lib.rs").unwrap().hash,
            index.get("src/lib.rs").unwrap().hash
        );

        // Missing file loads empty.
        let empty = Index::load(&dir.path().join("absent"), kind).unwrap();
        assert!(empty.is_empty());
    }

    /// A corrupted byte fails the trailer checksum.
    #[test]
    fn test_index_checksum() {
        let kind = HashKind::Sha1;
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("index");

        let mut index = Index::new(kind);
        index.add_entry(entry(kind, "a.txt", b"a"));
        index.save(&path).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            Index::load(&path, kind),
            Err(WitError::MalformedObject(_))
        ));
    }

    /// Tree synthesis nests directories and matches a hand-built tree.
    #[test]
    fn test_commit_tree() {
        let kind = HashKind::Sha256;
        let dir = tempfile::TempDir::new().unwrap();
        let store = Store::new(dir.path().join("objects"), kind);

        let mut index = Index::new(kind);
        for (path, content) in [
            ("a.txt", b"a".as_slice()),
            ("sub/b.txt", b"b".as_slice()),
            ("sub/deeper/c.txt", b"c".as_slice()),
        ] {
            store.put_raw(ObjectType::Blob, content).unwrap();
            index.add_entry(entry(kind, path, content));
        }

        let root_id = index.commit_tree(&store).unwrap();
        let root = store.get(&root_id).unwrap().into_tree().unwrap();
        assert!(root.find("a.txt").is_some());
        let sub_item = root.find("sub").unwrap();
        assert!(sub_item.mode.is_tree());
        let sub = store.get(&sub_item.id).unwrap().into_tree().unwrap();
        assert!(sub.find("b.txt").is_some());
        assert!(sub.find("deeper").is_some());

        // read_tree flattens back to the same paths and hashes.
        let mut rehydrated = Index::new(kind);
        rehydrated.read_tree(&store, &root_id).unwrap();
        assert_eq!(rehydrated.len(), 3);
        assert_eq!(
            rehydrated.get("sub/deeper/c.txt").unwrap().hash,
            index.get("sub/deeper/c.txt").unwrap().hash
        );
    }

    /// Conflict stages coexist, block commit_tree, and clear on add.
    #[test]
    fn test_conflict_stages() {
        let kind = HashKind::Sha256;
        let dir = tempfile::TempDir::new().unwrap();
        let store = Store::new(dir.path().join("objects"), kind);

        let mut index = Index::new(kind);
        index.set_conflict(
            "x.txt",
            Some(entry(kind, "x.txt", b"base")),
            Some(entry(kind, "x.txt", b"ours")),
            Some(entry(kind, "x.txt", b"theirs")),
        );
        assert!(index.has_conflicts());
        assert_eq!(index.conflicted_paths(), vec!["x.txt".to_string()]);
        assert!(matches!(
            index.commit_tree(&store),
            Err(WitError::Conflict(_))
        ));

        index.add_entry(entry(kind, "x.txt", b"resolved"));
        assert!(!index.has_conflicts());
        assert!(index.commit_tree(&store).is_ok());
    }

    /// Stat fast path: equal size+mtime short-circuits, anything else does not.
    #[test]
    fn test_stat_matches() {
        let e = entry(HashKind::Sha1, "f", b"content");
        assert!(e.stat_matches(7, 1_700_000_000));
        assert!(!e.stat_matches(8, 1_700_000_000));
        assert!(!e.stat_matches(7, 1_700_000_001));
    }
}
