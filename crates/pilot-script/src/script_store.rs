use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use pilot_core::{current_unix_timestamp_ms, write_text_atomic};

use crate::script_contract::{
    parse_script_document, validate_test_script, ScriptError, ScriptPolicy, TestScript,
};

static ARTIFACT_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Mints a time-derived artifact name, unique within this process.
fn mint_script_name() -> String {
    let millis = current_unix_timestamp_ms();
    let count = ARTIFACT_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("test-{millis}-{count}.json")
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `SavedScript` used across pilot components.
pub struct SavedScript {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
/// Write-once artifact store under a fixed scripts directory.
pub struct ScriptStore {
    root: PathBuf,
    policy: ScriptPolicy,
}

impl ScriptStore {
    pub fn new(root: impl Into<PathBuf>, policy: ScriptPolicy) -> Self {
        Self {
            root: root.into(),
            policy,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn policy(&self) -> &ScriptPolicy {
        &self.policy
    }

    /// Creates the artifacts directory if it is absent.
    pub fn ensure_root(&self) -> Result<(), ScriptError> {
        std::fs::create_dir_all(&self.root).map_err(|source| ScriptError::Io {
            path: self.root.display().to_string(),
            source,
        })
    }

    /// Persists a validated script under a fresh time-derived name.
    ///
    /// Artifacts are write-once: every save gets its own name, nothing is
    /// overwritten or deleted here.
    pub fn save(&self, script: &TestScript) -> Result<SavedScript, ScriptError> {
        validate_test_script(script, &self.policy)?;
        self.ensure_root()?;

        let name = mint_script_name();
        let path = self.root.join(&name);
        let body = serde_json::to_string_pretty(script)
            .map_err(|error| ScriptError::Contract(format!("script failed to serialize: {error}")))?;
        write_text_atomic(&path, &body).map_err(|error| ScriptError::Io {
            path: path.display().to_string(),
            source: std::io::Error::other(error.to_string()),
        })?;

        Ok(SavedScript { name, path })
    }

    /// Loads and structurally validates a previously persisted script.
    pub fn load(&self, name: &str) -> Result<TestScript, ScriptError> {
        let name = validate_script_name(name)?;
        let path = self.root.join(name);
        if !path.is_file() {
            return Err(ScriptError::NotFound(name.to_string()));
        }

        let raw = std::fs::read_to_string(&path).map_err(|source| ScriptError::Io {
            path: path.display().to_string(),
            source,
        })?;
        parse_script_document(&raw, &self.policy)
    }
}

/// Artifact names are plain file names minted by this store; anything that
/// could traverse outside the artifacts directory is rejected up front.
fn validate_script_name(name: &str) -> Result<&str, ScriptError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ScriptError::Contract(
            "script name cannot be empty".to_string(),
        ));
    }
    if !trimmed.ends_with(".json")
        || !trimmed
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.')
        || trimmed.contains("..")
    {
        return Err(ScriptError::Contract(format!(
            "script name '{trimmed}' is not a valid artifact name"
        )));
    }
    Ok(trimmed)
}
