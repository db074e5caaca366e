//! Migration from an existing Git repository: walk its loose objects,
//! re-encode every object under the target hash algorithm with child
//! references rewritten, preserve the DAG, and record the old-to-new id
//! pairing in an on-disk map. Git is an import source only; nothing is
//! written back into the source directory.

use std::{
    collections::{BTreeMap, HashSet},
    fs,
    io::{BufReader, Read, Write},
    path::{Path, PathBuf},
    str::FromStr,
    sync::atomic::{AtomicBool, Ordering},
};

use flate2::bufread::ZlibDecoder;
use tracing::{debug, info};

use crate::{
    errors::WitError,
    hash::{HashKind, ObjectHash},
    internal::{
        object::{
            ObjectTrait,
            commit::Commit,
            tag::Tag,
            tree::{Tree, TreeItem},
            types::ObjectType,
        },
        store::read_loose_header,
    },
    refs,
    repo::Repo,
};

/// Phases reported to the progress callback, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPhase {
    Scanning,
    Objects,
    Refs,
    Head,
    Complete,
}

/// One progress tick: `(phase, current, total, item)`.
#[derive(Debug, Clone)]
pub struct MigrationProgress {
    pub phase: MigrationPhase,
    pub current: usize,
    pub total: usize,
    pub item: String,
}

/// Inputs for [`migrate_from_git`].
pub struct MigrationOptions<'a> {
    /// The source `.git` directory (loose-object layout).
    pub git_dir: PathBuf,
    /// Workdir of the repository to create.
    pub wit_dir: PathBuf,
    /// `sha1` keeps blob ids stable; `sha256` rewrites every id.
    pub hash_algorithm: HashKind,
    /// Invoked once per phase step.
    pub on_progress: Option<&'a mut dyn FnMut(MigrationProgress)>,
    /// Checked between objects; when set, the run stops early leaving a
    /// consistent partial result for the next GC to tidy.
    pub cancel: Option<&'a AtomicBool>,
}

/// What a migration (or a stats pass) found.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub blobs: usize,
    pub trees: usize,
    pub commits: usize,
    pub tags: usize,
    pub branches: usize,
    pub tag_refs: usize,
    pub map_entries: usize,
    pub cancelled: bool,
}

/// Pre-flight advisory severities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvisorySeverity {
    /// The migration cannot run.
    Blocker,
    /// The migration runs but loses or ignores something.
    Warning,
}

/// One pre-flight advisory from [`can_migrate`].
#[derive(Debug, Clone)]
pub struct Advisory {
    pub severity: AdvisorySeverity,
    pub message: String,
}

/// Validate a Git directory without migrating: a missing objects directory
/// blocks, shallow-clone markers and submodule configuration warn.
pub fn can_migrate(git_dir: &Path) -> Vec<Advisory> {
    let mut advisories = Vec::new();
    if !git_dir.join("objects").is_dir() {
        advisories.push(Advisory {
            severity: AdvisorySeverity::Blocker,
            message: format!("`{}` has no objects directory", git_dir.display()),
        });
    }
    if git_dir.join("shallow").is_file() {
        advisories.push(Advisory {
            severity: AdvisorySeverity::Warning,
            message: "shallow clone: history beyond the shallow boundary is absent".to_string(),
        });
    }
    let has_modules = git_dir.join("gitmodules").is_file()
        || git_dir
            .parent()
            .is_some_and(|parent| parent.join(".gitmodules").is_file());
    if has_modules {
        advisories.push(Advisory {
            severity: AdvisorySeverity::Warning,
            message: "submodule configuration found; submodules are not migrated".to_string(),
        });
    }
    advisories
}

/// Count objects, branches and tags without performing the migration.
pub fn migration_stats(git_dir: &Path) -> Result<MigrationReport, WitError> {
    let mut report = MigrationReport::default();
    for id in enumerate_git_objects(git_dir)? {
        let (object_type, _) = read_git_loose_header_only(git_dir, &id)?;
        match object_type {
            ObjectType::Blob => report.blobs += 1,
            ObjectType::Tree => report.trees += 1,
            ObjectType::Commit => report.commits += 1,
            ObjectType::Tag => report.tags += 1,
        }
    }
    report.branches = count_ref_files(&git_dir.join("refs/heads"));
    report.tag_refs = count_ref_files(&git_dir.join("refs/tags"));
    Ok(report)
}

/// Run the migration. The target repository is initialized at
/// `opts.wit_dir` with the chosen algorithm; every source ref gains a
/// migrated counterpart and the id pairing lands at `.wit/migration-map`.
pub fn migrate_from_git(mut opts: MigrationOptions) -> Result<MigrationReport, WitError> {
    let blockers: Vec<Advisory> = can_migrate(&opts.git_dir)
        .into_iter()
        .filter(|a| a.severity == AdvisorySeverity::Blocker)
        .collect();
    if let Some(blocker) = blockers.first() {
        return Err(WitError::NotFound(blocker.message.clone()));
    }

    let repo = Repo::init(&opts.wit_dir, opts.hash_algorithm)?;
    let mut report = MigrationReport::default();

    // Phase 1: scan.
    emit(&mut opts.on_progress, MigrationPhase::Scanning, 0, 0, "");
    let git_ids = enumerate_git_objects(&opts.git_dir)?;
    let total = git_ids.len();
    emit(
        &mut opts.on_progress,
        MigrationPhase::Scanning,
        total,
        total,
        "",
    );

    // Phase 2: objects, dependency-first so every child id is already
    // remapped when its parent re-encodes.
    let mut migrator = Migrator {
        git_dir: opts.git_dir.clone(),
        repo: &repo,
        map: BTreeMap::new(),
        report: &mut report,
    };
    let mut cancelled = false;
    for (current, id) in git_ids.iter().enumerate() {
        if let Some(flag) = opts.cancel {
            if flag.load(Ordering::Relaxed) {
                cancelled = true;
                break;
            }
        }
        migrator.migrate(id)?;
        emit(
            &mut opts.on_progress,
            MigrationPhase::Objects,
            current + 1,
            total,
            &id.to_string(),
        );
    }
    let map = migrator.map;
    report.cancelled = cancelled;
    report.map_entries = map.len();
    write_migration_map(&repo, &map)?;
    if report.cancelled {
        info!(target: "wit::migration", migrated = map.len(), "migration cancelled");
        return Ok(report);
    }

    // Phase 3: refs.
    let branch_names = collect_git_refs(&opts.git_dir.join("refs/heads"))?;
    let tag_names = collect_git_refs(&opts.git_dir.join("refs/tags"))?;
    let ref_total = branch_names.len() + tag_names.len();
    let mut ref_current = 0usize;
    for (name, old_id) in &branch_names {
        let new_id = map
            .get(old_id)
            .ok_or_else(|| WitError::NotFound(format!("migrated object for branch `{name}`")))?;
        refs::write_branch(&repo, name, new_id)?;
        report.branches += 1;
        ref_current += 1;
        emit(
            &mut opts.on_progress,
            MigrationPhase::Refs,
            ref_current,
            ref_total,
            name,
        );
    }
    for (name, old_id) in &tag_names {
        let new_id = map
            .get(old_id)
            .ok_or_else(|| WitError::NotFound(format!("migrated object for tag `{name}`")))?;
        refs::write_tag(&repo, name, new_id)?;
        report.tag_refs += 1;
        ref_current += 1;
        emit(
            &mut opts.on_progress,
            MigrationPhase::Refs,
            ref_current,
            ref_total,
            name,
        );
    }

    // Phase 4: HEAD. Symbolic targets keep their name; a detached hash is
    // remapped.
    let head_text = fs::read_to_string(opts.git_dir.join("HEAD")).unwrap_or_default();
    let head_text = head_text.trim_end();
    if let Some(target) = head_text.strip_prefix("ref: refs/heads/") {
        refs::set_head_branch(&repo, target)?;
    } else if let Ok(old_head) = ObjectHash::from_str(head_text) {
        if let Some(new_head) = map.get(&old_head) {
            refs::set_head_detached(&repo, new_head)?;
        }
    }
    emit(&mut opts.on_progress, MigrationPhase::Head, 1, 1, head_text);

    emit(&mut opts.on_progress, MigrationPhase::Complete, total, total, "");
    info!(
        target: "wit::migration",
        blobs = report.blobs,
        trees = report.trees,
        commits = report.commits,
        tags = report.tags,
        branches = report.branches,
        "migration complete"
    );
    Ok(report)
}

fn emit(
    on_progress: &mut Option<&mut dyn FnMut(MigrationProgress)>,
    phase: MigrationPhase,
    current: usize,
    total: usize,
    item: &str,
) {
    if let Some(callback) = on_progress {
        callback(MigrationProgress {
            phase,
            current,
            total,
            item: item.to_string(),
        });
    }
}

struct Migrator<'a> {
    git_dir: PathBuf,
    repo: &'a Repo,
    map: BTreeMap<ObjectHash, ObjectHash>,
    report: &'a mut MigrationReport,
}

impl Migrator<'_> {
    /// Migrate one object and (first) everything it references. Children
    /// are resolved with an explicit stack so deep histories cannot
    /// overflow the call stack.
    fn migrate(&mut self, id: &ObjectHash) -> Result<ObjectHash, WitError> {
        let mut stack: Vec<ObjectHash> = vec![*id];
        let mut expanded: HashSet<ObjectHash> = HashSet::new();
        while let Some(&current) = stack.last() {
            if self.map.contains_key(&current) {
                stack.pop();
                continue;
            }
            let (object_type, body) = read_git_loose(&self.git_dir, &current)?;
            let pending = self.unmigrated_children(object_type, &body, &current)?;
            if pending.is_empty() || expanded.contains(&current) {
                let new_id = self.encode_migrated(object_type, &body, &current)?;
                self.map.insert(current, new_id);
                stack.pop();
            } else {
                expanded.insert(current);
                stack.extend(pending);
            }
        }
        self.map
            .get(id)
            .copied()
            .ok_or_else(|| WitError::object_not_found(id))
    }

    fn unmigrated_children(
        &self,
        object_type: ObjectType,
        body: &[u8],
        id: &ObjectHash,
    ) -> Result<Vec<ObjectHash>, WitError> {
        let children: Vec<ObjectHash> = match object_type {
            ObjectType::Blob => Vec::new(),
            ObjectType::Tree => Tree::from_bytes(body, *id)?
                .tree_items
                .into_iter()
                .map(|item| item.id)
                .collect(),
            ObjectType::Commit => {
                let commit = Commit::from_bytes(body, *id)?;
                let mut children = vec![commit.tree_id];
                children.extend(commit.parent_commit_ids);
                children
            }
            ObjectType::Tag => vec![Tag::from_bytes(body, *id)?.object_hash],
        };
        Ok(children
            .into_iter()
            .filter(|child| !self.map.contains_key(child))
            .collect())
    }

    /// Re-encode one object under the target algorithm, translating every
    /// child reference through the map. Blob bodies are byte-identical, so
    /// a SHA-1 target reproduces the source blob ids exactly.
    fn encode_migrated(
        &mut self,
        object_type: ObjectType,
        body: &[u8],
        id: &ObjectHash,
    ) -> Result<ObjectHash, WitError> {
        let kind = self.repo.kind();
        let store = self.repo.store();
        let remap = |map: &BTreeMap<ObjectHash, ObjectHash>,
                     child: &ObjectHash|
         -> Result<ObjectHash, WitError> {
            map.get(child)
                .copied()
                .ok_or_else(|| WitError::object_not_found(child))
        };

        let new_id = match object_type {
            ObjectType::Blob => {
                self.report.blobs += 1;
                store.put_raw(ObjectType::Blob, body)?
            }
            ObjectType::Tree => {
                self.report.trees += 1;
                let tree = Tree::from_bytes(body, *id)?;
                let items = tree
                    .tree_items
                    .into_iter()
                    .map(|item| {
                        Ok(TreeItem::new(
                            item.mode,
                            remap(&self.map, &item.id)?,
                            item.name,
                        ))
                    })
                    .collect::<Result<Vec<TreeItem>, WitError>>()?;
                let new_tree = Tree::from_tree_items(kind, items)?;
                store.put_raw(ObjectType::Tree, &new_tree.to_data()?)?
            }
            ObjectType::Commit => {
                self.report.commits += 1;
                let commit = Commit::from_bytes(body, *id)?;
                let tree_id = remap(&self.map, &commit.tree_id)?;
                let parents = commit
                    .parent_commit_ids
                    .iter()
                    .map(|parent| remap(&self.map, parent))
                    .collect::<Result<Vec<ObjectHash>, WitError>>()?;
                let new_commit = Commit::new(
                    kind,
                    commit.author.clone(),
                    commit.committer.clone(),
                    tree_id,
                    parents,
                    &commit.message,
                )?;
                store.put_raw(ObjectType::Commit, &new_commit.to_data()?)?
            }
            ObjectType::Tag => {
                self.report.tags += 1;
                let tag = Tag::from_bytes(body, *id)?;
                let target = remap(&self.map, &tag.object_hash)?;
                let new_tag = Tag::new(
                    kind,
                    target,
                    tag.object_type,
                    tag.tag_name.clone(),
                    tag.tagger.clone(),
                    &tag.message,
                )?;
                store.put_raw(ObjectType::Tag, &new_tag.to_data()?)?
            }
        };
        debug!(target: "wit::migration", old = %id, new = %new_id, ?object_type, "object migrated");
        Ok(new_id)
    }
}

/// All loose object ids under `objects/<aa>/`, sorted.
fn enumerate_git_objects(git_dir: &Path) -> Result<Vec<ObjectHash>, WitError> {
    let objects = git_dir.join("objects");
    let mut ids = Vec::new();
    let entries = match fs::read_dir(&objects) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
        Err(e) => return Err(WitError::IOError(e)),
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let prefix = entry.file_name().to_string_lossy().into_owned();
        if prefix.len() != 2 || !prefix.chars().all(|c| c.is_ascii_hexdigit()) {
            continue;
        }
        for file in fs::read_dir(entry.path())?.filter_map(|e| e.ok()) {
            let rest = file.file_name().to_string_lossy().into_owned();
            if let Ok(id) = ObjectHash::from_str(&format!("{prefix}{rest}")) {
                ids.push(id);
            }
        }
    }
    ids.sort_by_key(|id| id.to_string());
    Ok(ids)
}

fn git_object_path(git_dir: &Path, id: &ObjectHash) -> PathBuf {
    let hex = id.to_string();
    git_dir.join("objects").join(&hex[..2]).join(&hex[2..])
}

/// Inflate a Git loose object fully.
fn read_git_loose(git_dir: &Path, id: &ObjectHash) -> Result<(ObjectType, Vec<u8>), WitError> {
    let path = git_object_path(git_dir, id);
    let file = fs::File::open(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            WitError::object_not_found(id)
        } else {
            WitError::IOError(e)
        }
    })?;
    let mut decoder = ZlibDecoder::new(BufReader::new(file));
    let (object_type, size) = read_loose_header(&mut decoder)?;
    let mut body = Vec::with_capacity(size as usize);
    decoder.read_to_end(&mut body)?;
    if body.len() as u64 != size {
        return Err(WitError::MalformedObject(format!(
            "git object `{id}` declares {size} bytes but holds {}",
            body.len()
        )));
    }
    Ok((object_type, body))
}

/// Inflate only far enough to classify the object.
fn read_git_loose_header_only(
    git_dir: &Path,
    id: &ObjectHash,
) -> Result<(ObjectType, u64), WitError> {
    let path = git_object_path(git_dir, id);
    let file = fs::File::open(&path)?;
    let mut decoder = ZlibDecoder::new(BufReader::new(file));
    read_loose_header(&mut decoder)
}

fn count_ref_files(root: &Path) -> usize {
    fn walk(dir: &Path, count: &mut usize) {
        if let Ok(entries) = fs::read_dir(dir) {
            for entry in entries.filter_map(|e| e.ok()) {
                let path = entry.path();
                if path.is_dir() {
                    walk(&path, count);
                } else {
                    *count += 1;
                }
            }
        }
    }
    let mut count = 0;
    walk(root, &mut count);
    count
}

/// Nested ref files as `(name, id)` pairs.
fn collect_git_refs(root: &Path) -> Result<Vec<(String, ObjectHash)>, WitError> {
    fn walk(
        dir: &Path,
        prefix: String,
        out: &mut Vec<(String, ObjectHash)>,
    ) -> Result<(), WitError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(WitError::IOError(e)),
        };
        let mut entries: Vec<_> = entries.filter_map(|e| e.ok()).collect();
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            let nested = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}/{name}")
            };
            let path = entry.path();
            if path.is_dir() {
                walk(&path, nested, out)?;
            } else {
                let text = fs::read_to_string(&path)?;
                let id = ObjectHash::from_str(text.trim_end()).map_err(|_| {
                    WitError::InvalidRef(format!("git ref `{nested}` holds `{}`", text.trim_end()))
                })?;
                out.push((nested, id));
            }
        }
        Ok(())
    }
    let mut out = Vec::new();
    walk(root, String::new(), &mut out)?;
    Ok(out)
}

/// Persist the pairing as `<old-id> <new-id>` lines, atomically.
fn write_migration_map(
    repo: &Repo,
    map: &BTreeMap<ObjectHash, ObjectHash>,
) -> Result<(), WitError> {
    let path = repo.migration_map_path();
    let dir = path
        .parent()
        .ok_or_else(|| WitError::NotFound(format!("parent of {}", path.display())))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    for (old, new) in map {
        writeln!(tmp, "{old} {new}")?;
    }
    tmp.persist(&path).map_err(|e| WitError::IOError(e.error))?;
    Ok(())
}

/// Parse a previously written migration map.
pub fn read_migration_map(
    repo: &Repo,
) -> Result<BTreeMap<ObjectHash, ObjectHash>, WitError> {
    let text = match fs::read_to_string(repo.migration_map_path()) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(WitError::IOError(e)),
    };
    let mut map = BTreeMap::new();
    for line in text.lines() {
        let (old, new) = line.split_once(' ').ok_or_else(|| {
            WitError::MalformedObject(format!("migration map line `{line}`"))
        })?;
        let old = ObjectHash::from_str(old)
            .map_err(|e| WitError::MalformedObject(format!("migration map: {e}")))?;
        let new = ObjectHash::from_str(new)
            .map_err(|e| WitError::MalformedObject(format!("migration map: {e}")))?;
        map.insert(old, new);
    }
    Ok(map)
}
