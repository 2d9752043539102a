//! Persistent preference store.
//!
//! # Storage layout
//!
//! ```text
//! ~/.zem/
//!   preferences.yaml   (mode 0600, created with defaults on first load)
//! ```
//!
//! # API pattern
//!
//! Every function touching disk has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::error::PrefsError;
use crate::metadata::Metadata;
use crate::types::HelperApp;

/// Version stamped into `version_check`; a different stored value triggers
/// the upgrade-or-reset choice at daemon start.
pub const PREFS_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Poll interval used when `save_interval` is unset, zero or negative.
pub const DEFAULT_SAVE_INTERVAL: f64 = 20.0;

/// Top-level keys that survive an upgrade untouched. Anything else found in
/// an old preferences file is treated as a legacy helper-app entry.
const KEEP_KEYS: &[&str] = &[
    "always_borrow_locks",
    "cleanup_files",
    "confirm_on_finish",
    "helper_apps",
    "save_interval",
    "temp_dir",
    "use_locks",
    "version_check",
];

// ---------------------------------------------------------------------------
// 1. Preferences
// ---------------------------------------------------------------------------

/// User preferences, persisted as YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_check: Option<String>,
    /// Delete the consumed `.zem` file on open and the mirror on finish.
    #[serde(default = "default_true")]
    pub cleanup_files: bool,
    #[serde(default = "default_true")]
    pub confirm_on_finish: bool,
    /// Poll interval in seconds.
    #[serde(default = "default_save_interval")]
    pub save_interval: f64,
    #[serde(default = "default_true")]
    pub use_locks: bool,
    #[serde(default)]
    pub always_borrow_locks: bool,
    /// Directory that holds local mirrors.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    #[serde(default)]
    pub helper_apps: BTreeMap<String, HelperApp>,
}

fn default_true() -> bool {
    true
}

fn default_save_interval() -> f64 {
    DEFAULT_SAVE_INTERVAL
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir()
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            version_check: Some(PREFS_VERSION.to_owned()),
            cleanup_files: true,
            confirm_on_finish: true,
            save_interval: DEFAULT_SAVE_INTERVAL,
            use_locks: true,
            always_borrow_locks: false,
            temp_dir: default_temp_dir(),
            helper_apps: BTreeMap::new(),
        }
    }
}

/// Result of comparing the stored `version_check` with [`PREFS_VERSION`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionStatus {
    Current,
    Outdated { found: Option<String> },
}

impl Preferences {
    pub fn version_status(&self) -> VersionStatus {
        match self.version_check.as_deref() {
            Some(v) if v == PREFS_VERSION => VersionStatus::Current,
            other => VersionStatus::Outdated {
                found: other.map(str::to_owned),
            },
        }
    }

    /// Poll interval derived from `save_interval`.
    pub fn poll_interval(&self) -> Duration {
        if self.save_interval.is_finite() && self.save_interval > 0.0 {
            Duration::from_secs_f64(self.save_interval)
        } else {
            Duration::from_secs_f64(DEFAULT_SAVE_INTERVAL)
        }
    }

    /// Helper app for a document: exact meta type, then exact content type,
    /// then the content type's `<major>/*` wildcard.
    pub fn helper_for(&self, metadata: &Metadata) -> Option<&HelperApp> {
        if let Some(found) = metadata
            .meta_type
            .as_deref()
            .and_then(|t| self.helper_apps.get(t))
        {
            return Some(found);
        }
        let content_type = metadata.content_type.as_deref()?;
        let essence = content_type.split(';').next().unwrap_or_default().trim();
        if let Some(found) = self.helper_apps.get(essence) {
            return Some(found);
        }
        let major = essence.split('/').next().unwrap_or_default();
        self.helper_apps.get(&format!("{major}/*"))
    }

    /// Register or replace the helper app for `doc_type`.
    pub fn add_helper(&mut self, doc_type: &str, editor: &str, extension: &str) {
        self.helper_apps.insert(
            doc_type.to_owned(),
            HelperApp {
                editor: editor.to_owned(),
                extension: extension.to_owned(),
            },
        );
    }

    /// Returns `true` when an entry was removed.
    pub fn remove_helper(&mut self, doc_type: &str) -> bool {
        self.helper_apps.remove(doc_type).is_some()
    }

    /// Update one scalar preference from its string form.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), PrefsError> {
        match key {
            "cleanup_files" => self.cleanup_files = parse_bool(key, value)?,
            "confirm_on_finish" => self.confirm_on_finish = parse_bool(key, value)?,
            "use_locks" => {
                self.use_locks = parse_bool(key, value)?;
                // Borrowing only makes sense while locks are in use.
                if !self.use_locks {
                    self.always_borrow_locks = false;
                }
            }
            "always_borrow_locks" => self.always_borrow_locks = parse_bool(key, value)?,
            "save_interval" => {
                self.save_interval = value.trim().parse::<f64>().map_err(|_| {
                    PrefsError::InvalidValue {
                        key: key.to_owned(),
                        value: value.to_owned(),
                        expected: "a number of seconds",
                    }
                })?;
            }
            "temp_dir" => {
                if value.trim().is_empty() {
                    return Err(PrefsError::InvalidValue {
                        key: key.to_owned(),
                        value: value.to_owned(),
                        expected: "a directory path",
                    });
                }
                self.temp_dir = PathBuf::from(value.trim());
            }
            other => return Err(PrefsError::UnknownKey(other.to_owned())),
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, PrefsError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(PrefsError::InvalidValue {
            key: key.to_owned(),
            value: value.to_owned(),
            expected: "true or false",
        }),
    }
}

// ---------------------------------------------------------------------------
// 2. Paths
// ---------------------------------------------------------------------------

/// `<home>/.zem/`
pub fn zem_root(home: &Path) -> PathBuf {
    home.join(".zem")
}

/// `<home>/.zem/preferences.yaml`: pure, no I/O.
pub fn prefs_path_at(home: &Path) -> PathBuf {
    zem_root(home).join("preferences.yaml")
}

// ---------------------------------------------------------------------------
// 3. Load / save
// ---------------------------------------------------------------------------

/// Load preferences, writing the defaults first if no file exists yet.
///
/// Returns `PrefsError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(home: &Path) -> Result<Preferences, PrefsError> {
    let path = prefs_path_at(home);
    if !path.exists() {
        let prefs = Preferences::default();
        save_at(home, &prefs)?;
        return Ok(prefs);
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| PrefsError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Preferences, PrefsError> {
    load_at(&home()?)
}

/// Atomically save preferences to `<home>/.zem/preferences.yaml`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, prefs: &Preferences) -> Result<(), PrefsError> {
    let yaml = serde_yaml::to_string(prefs)?;
    write_atomic(home, &yaml)
}

/// `save_at` convenience wrapper.
pub fn save(prefs: &Preferences) -> Result<(), PrefsError> {
    save_at(&home()?, prefs)
}

// ---------------------------------------------------------------------------
// 4. Migration
// ---------------------------------------------------------------------------

/// Migrate a preferences file written by an older version.
///
/// Known keys are kept when their value still has the right type. Any other top-level mapping is folded into
/// `helper_apps`: a mapping with an `editor` entry becomes
/// `helper_apps[key]`, otherwise each of its sub-mappings becomes
/// `helper_apps["key/sub"]`. `confirm_on_finish` defaults to true when the
/// old file predates it, and `version_check` is stamped with the current
/// version.
pub fn upgrade_at(home: &Path) -> Result<Preferences, PrefsError> {
    let path = prefs_path_at(home);
    let old: Mapping = if path.exists() {
        let contents = std::fs::read_to_string(&path)?;
        match serde_yaml::from_str::<Value>(&contents)
            .map_err(|e| PrefsError::Parse { path: path.clone(), source: e })?
        {
            Value::Mapping(map) => map,
            _ => Mapping::new(),
        }
    } else {
        Mapping::new()
    };

    let mut kept = Mapping::new();
    let mut helpers = match old.get("helper_apps") {
        Some(Value::Mapping(map)) => map.clone(),
        _ => Mapping::new(),
    };

    for (key, value) in &old {
        let Some(name) = key.as_str() else { continue };
        if KEEP_KEYS.contains(&name) {
            if name != "helper_apps" && fits_field(key, value) {
                kept.insert(key.clone(), value.clone());
            }
            continue;
        }
        let Value::Mapping(entry) = value else { continue };
        if entry.contains_key("editor") {
            helpers.insert(key.clone(), value.clone());
        } else {
            for (sub_key, sub_value) in entry {
                let Some(sub_name) = sub_key.as_str() else { continue };
                if matches!(sub_value, Value::Mapping(_)) {
                    helpers.insert(
                        Value::String(format!("{name}/{sub_name}")),
                        sub_value.clone(),
                    );
                }
            }
        }
    }

    helpers.retain(|_, entry| serde_yaml::from_value::<HelperApp>(entry.clone()).is_ok());
    kept.insert("helper_apps".into(), Value::Mapping(helpers));
    if !kept.contains_key("confirm_on_finish") {
        kept.insert("confirm_on_finish".into(), Value::Bool(true));
    }
    kept.insert(
        "version_check".into(),
        Value::String(PREFS_VERSION.to_owned()),
    );

    let prefs: Preferences = serde_yaml::from_value(Value::Mapping(kept))
        .map_err(|e| PrefsError::Parse { path, source: e })?;
    save_at(home, &prefs)?;
    Ok(prefs)
}

/// Whether `value` deserializes into the preference field named `key`.
/// Values that do not are dropped on upgrade and fall back to defaults.
fn fits_field(key: &Value, value: &Value) -> bool {
    if value.is_null() {
        return false;
    }
    let mut single = Mapping::new();
    single.insert(key.clone(), value.clone());
    serde_yaml::from_value::<Preferences>(Value::Mapping(single)).is_ok()
}

/// `upgrade_at` convenience wrapper.
pub fn upgrade() -> Result<Preferences, PrefsError> {
    upgrade_at(&home()?)
}

/// Discard stored preferences and write the defaults.
pub fn reset_at(home: &Path) -> Result<Preferences, PrefsError> {
    let prefs = Preferences::default();
    save_at(home, &prefs)?;
    Ok(prefs)
}

/// `reset_at` convenience wrapper.
pub fn reset() -> Result<Preferences, PrefsError> {
    reset_at(&home()?)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

pub(crate) fn home() -> Result<PathBuf, PrefsError> {
    dirs::home_dir().ok_or(PrefsError::HomeNotFound)
}

fn write_atomic(home: &Path, contents: &str) -> Result<(), PrefsError> {
    let root = zem_root(home);
    if !root.exists() {
        std::fs::create_dir_all(&root)?;
        set_dir_permissions(&root)?;
    }
    let path = prefs_path_at(home);
    let tmp_path = path.with_file_name("preferences.yaml.tmp");
    std::fs::write(&tmp_path, contents)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), PrefsError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), PrefsError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), PrefsError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), PrefsError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
