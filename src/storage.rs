//! Persistence
//!
//! The core treats storage as a plain string key-value store. [`ProprioStore`]
//! layers the typed records on top of it using the key scheme
//! `user_<id>_<category>[_<sessionId>]`. Every write overwrites the whole
//! record, so repeated writes are safe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::ProprioError;
use crate::types::{HandSizeCalibration, UserPreference, UserProfile};

/// Identifier of the default local user
pub const GUEST_ID: &str = "guest";

/// Minimal key-value contract the core persists through
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, ProprioError>;

    fn set(&mut self, key: &str, value: &str) -> Result<(), ProprioError>;

    /// All stored keys, in no particular order
    fn keys(&self) -> Result<Vec<String>, ProprioError>;
}

/// In-process store, mostly for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, ProprioError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), ProprioError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, ProprioError> {
        Ok(self.entries.keys().cloned().collect())
    }
}

/// Directory-backed store: one `<key>.json` file per key
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `root`
    pub fn open(root: impl AsRef<Path>) -> Result<Self, ProprioError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, ProprioError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(ProprioError::Storage(format!("invalid key '{key}'")));
        }
        Ok(self.root.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, ProprioError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ProprioError::Storage(format!("{}: {e}", path.display()))),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), ProprioError> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)
            .and_then(|_| fs::rename(&tmp, &path))
            .map_err(|e| ProprioError::Storage(format!("{}: {e}", path.display())))
    }

    fn keys(&self) -> Result<Vec<String>, ProprioError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(key) = name.to_str().and_then(|n| n.strip_suffix(".json")) {
                keys.push(key.to_string());
            }
        }
        Ok(keys)
    }
}

/// Stored result of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResultRecord {
    /// Trial scores in completion order
    pub data: Vec<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Typed records over a [`KeyValueStore`]
#[derive(Debug, Clone)]
pub struct ProprioStore<S> {
    inner: S,
}

impl<S: KeyValueStore> ProprioStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    pub fn profile_key(user_id: &str) -> String {
        format!("user_{user_id}_profile")
    }

    pub fn session_prefix(user_id: &str, assessment_name: &str) -> String {
        format!("user_{user_id}_{assessment_name}_")
    }

    pub fn session_key(user_id: &str, assessment_name: &str, session_id: &str) -> String {
        format!("{}{session_id}", Self::session_prefix(user_id, assessment_name))
    }

    /// Stored profile object, or `None` if the user has no profile yet
    pub fn read_profile(&self, user_id: &str) -> Result<Option<UserProfile>, ProprioError> {
        match self.inner.get(&Self::profile_key(user_id))? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Stored profile, falling back to defaults for a new user
    pub fn load_profile(&self, user_id: &str) -> Result<UserProfile, ProprioError> {
        Ok(self.read_profile(user_id)?.unwrap_or_default())
    }

    pub fn read_calibration(&self, user_id: &str) -> Result<Option<HandSizeCalibration>, ProprioError> {
        Ok(self.read_profile(user_id)?.and_then(|p| p.calibration()))
    }

    pub fn write_calibration(
        &mut self,
        user_id: &str,
        calibration: &HandSizeCalibration,
    ) -> Result<(), ProprioError> {
        self.merge_profile(user_id, serde_json::to_value(calibration)?)
    }

    /// Persist preferences and demographics, keeping stored hand sizes
    pub fn write_preferences(
        &mut self,
        user_id: &str,
        preference: &UserPreference,
        age: u32,
        sex: &str,
    ) -> Result<(), ProprioError> {
        let fields = serde_json::json!({
            "impairedHand": preference.impaired_hand,
            "spasticitySeverity": preference.spasticity_severity,
            "age": age,
            "sex": sex,
        });
        self.merge_profile(user_id, fields)
    }

    /// Shallow-merge `fields` into the stored profile object; unknown keys survive
    fn merge_profile(&mut self, user_id: &str, fields: Value) -> Result<(), ProprioError> {
        let key = Self::profile_key(user_id);
        let mut profile = match self.inner.get(&key)? {
            Some(json) => match serde_json::from_str::<Value>(&json)? {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            None => Map::new(),
        };

        if let Value::Object(fields) = fields {
            profile.extend(fields);
        }

        self.inner.set(&key, &serde_json::to_string(&profile)?)?;
        debug!(%key, "profile saved");
        Ok(())
    }

    pub fn write_session_result(
        &mut self,
        user_id: &str,
        assessment_name: &str,
        session_id: &str,
        scores: &[f64],
        timestamp: DateTime<Utc>,
    ) -> Result<(), ProprioError> {
        let key = Self::session_key(user_id, assessment_name, session_id);
        let record = SessionResultRecord {
            data: scores.to_vec(),
            timestamp,
        };
        self.inner.set(&key, &serde_json::to_string(&record)?)?;
        debug!(%key, trials = scores.len(), "session results saved");
        Ok(())
    }

    pub fn read_session_result(
        &self,
        user_id: &str,
        assessment_name: &str,
        session_id: &str,
    ) -> Result<Option<SessionResultRecord>, ProprioError> {
        match self.inner.get(&Self::session_key(user_id, assessment_name, session_id))? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Every stored session of an assessment as `(session_id, raw_json)`, sorted by key
    pub fn session_entries(
        &self,
        user_id: &str,
        assessment_name: &str,
    ) -> Result<Vec<(String, String)>, ProprioError> {
        let prefix = Self::session_prefix(user_id, assessment_name);
        let mut keys: Vec<String> = self
            .inner
            .keys()?
            .into_iter()
            .filter(|k| k.starts_with(&prefix))
            .collect();
        keys.sort();

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(raw) = self.inner.get(&key)? {
                entries.push((key[prefix.len()..].to_string(), raw));
            }
        }
        Ok(entries)
    }
}
