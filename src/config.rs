//! Repository configuration: a git-style INI file under the metadata
//! directory, plus the author identity chain (environment variables first,
//! config second, fixed fallback last).

use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::Path,
};

use crate::{errors::WitError, hash::HashKind};

/// Default byte threshold above which blobs are chunked (32 MiB).
pub const DEFAULT_LARGE_FILE_THRESHOLD: u64 = 32 * 1024 * 1024;

/// Default journal retention window for GC marking, in days.
pub const DEFAULT_REFLOG_EXPIRE_DAYS: u32 = 30;

/// Parsed key/value configuration grouped by `[section]`.
///
/// The grammar is the subset of git-config this engine writes: section
/// headers, `key = value` lines, `#`/`;` comments, blank lines. Keys are
/// matched case-insensitively; values keep their case.
#[derive(Debug, Clone, Default)]
pub struct Config {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl Config {
    /// Parse config text.
    pub fn from_text(text: &str) -> Result<Config, WitError> {
        let mut sections = BTreeMap::new();
        let mut current: Option<String> = None;
        for (line_no, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(rest) = line.strip_prefix('[') {
                let name = rest.strip_suffix(']').ok_or_else(|| {
                    WitError::MalformedObject(format!(
                        "config line {}: unterminated section header",
                        line_no + 1
                    ))
                })?;
                let name = name.trim().to_ascii_lowercase();
                sections.entry(name.clone()).or_insert_with(BTreeMap::new);
                current = Some(name);
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                WitError::MalformedObject(format!(
                    "config line {}: expected `key = value`",
                    line_no + 1
                ))
            })?;
            let section = current.clone().ok_or_else(|| {
                WitError::MalformedObject(format!(
                    "config line {}: key outside any section",
                    line_no + 1
                ))
            })?;
            sections
                .entry(section)
                .or_insert_with(BTreeMap::new)
                .insert(
                    key.trim().to_ascii_lowercase(),
                    value.trim().to_string(),
                );
        }
        Ok(Config { sections })
    }

    /// Load from a file; a missing file is an empty config.
    pub fn load(path: &Path) -> Result<Config, WitError> {
        match fs::read_to_string(path) {
            Ok(text) => Config::from_text(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
            Err(e) => Err(WitError::IOError(e)),
        }
    }

    /// Serialize in canonical form: sorted sections, tab-indented keys.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (section, keys) in &self.sections {
            out.push_str(&format!("[{section}]\n"));
            for (key, value) in keys {
                out.push_str(&format!("\t{key} = {value}\n"));
            }
        }
        out
    }

    /// Persist atomically via temp file and rename.
    pub fn save(&self, path: &Path) -> Result<(), WitError> {
        let dir = path
            .parent()
            .ok_or_else(|| WitError::NotFound(format!("parent of {}", path.display())))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(self.to_text().as_bytes())?;
        tmp.persist(path).map_err(|e| WitError::IOError(e.error))?;
        Ok(())
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(&section.to_ascii_lowercase())
            .and_then(|keys| keys.get(&key.to_ascii_lowercase()))
            .map(|s| s.as_str())
    }

    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        self.sections
            .entry(section.to_ascii_lowercase())
            .or_default()
            .insert(key.to_ascii_lowercase(), value.into());
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.get(section, key)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "yes" | "on" | "1"))
            .unwrap_or(default)
    }

    /// `[wit] hashAlgorithm`, defaulting to SHA-1 for interop.
    pub fn hash_algorithm(&self) -> Result<HashKind, WitError> {
        match self.get("wit", "hashAlgorithm") {
            Some(token) => token.parse().map_err(WitError::MalformedObject),
            None => Ok(HashKind::Sha1),
        }
    }

    /// `[wit] largeFileThreshold` in bytes.
    pub fn large_file_threshold(&self) -> u64 {
        self.get("wit", "largeFileThreshold")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_LARGE_FILE_THRESHOLD)
    }

    /// `[wit] autoStashOnSwitch`.
    pub fn auto_stash_on_switch(&self) -> bool {
        self.get_bool("wit", "autoStashOnSwitch", false)
    }

    /// Build the config written by `init`.
    pub fn initial(kind: HashKind) -> Config {
        let mut config = Config::default();
        config.set("core", "repositoryformatversion", "1");
        config.set("core", "filemode", "true");
        config.set("core", "bare", "false");
        config.set("wit", "hashAlgorithm", kind.as_str());
        config.set(
            "wit",
            "largeFileThreshold",
            DEFAULT_LARGE_FILE_THRESHOLD.to_string(),
        );
        config.set("wit", "autoStashOnSwitch", "false");
        config
    }
}

/// Author identity as `(name, email)`.
///
/// Resolution order: `WIT_AUTHOR_NAME`/`WIT_AUTHOR_EMAIL`, then the Git
/// equivalents, then `[user]` in the repository config, then a fixed
/// placeholder so commits never fail for lack of identity.
pub fn resolve_author(config: &Config) -> (String, String) {
    let env_pair = |name_var: &str, email_var: &str| -> Option<(String, String)> {
        let name = std::env::var(name_var).ok().filter(|v| !v.is_empty())?;
        let email = std::env::var(email_var).ok().filter(|v| !v.is_empty())?;
        Some((name, email))
    };

    if let Some(pair) = env_pair("WIT_AUTHOR_NAME", "WIT_AUTHOR_EMAIL") {
        return pair;
    }
    if let Some(pair) = env_pair("GIT_AUTHOR_NAME", "GIT_AUTHOR_EMAIL") {
        return pair;
    }
    if let (Some(name), Some(email)) = (config.get("user", "name"), config.get("user", "email")) {
        return (name.to_string(), email.to_string());
    }
    ("wit".to_string(), "wit@localhost".to_string())
}
