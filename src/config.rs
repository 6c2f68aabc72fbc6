//! Typed run settings.
//!
//! The settings producer (YAML, CLI, ...) lives outside this crate; what
//! arrives here is JSON-shaped data that is parsed into [`Settings`] and
//! validated once. Unknown keys are rejected rather than ignored.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::skim::SkimDtype;
use crate::{Error, Result};

/// Settings key holding the network LOS block.
pub const LOS_SETTINGS_NAME: &str = "network_los";

/// Tables required for two- and three-zone systems.
pub const REQUIRED_TWO_ZONE_TABLES: [&str; 2] = ["maz_to_maz", "maz_to_taz"];

/// Extra table required for three-zone systems.
pub const REQUIRED_THREE_ZONE_TABLES: [&str; 1] = ["maz_to_tap"];

/// Skim tag every zone system must provide.
pub const REQUIRED_SKIM_TAG: &str = "taz";

// ============================================================================
// Zone system
// ============================================================================

/// Spatial granularity of the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ZoneSystem {
    /// TAZ only.
    One,
    /// MAZ + TAZ.
    Two,
    /// MAZ + TAZ + TAP.
    Three,
}

impl ZoneSystem {
    /// Whether MAZ-level tables are part of this zone system.
    pub fn has_maz(self) -> bool {
        matches!(self, ZoneSystem::Two | ZoneSystem::Three)
    }

    /// Table names that must be listed in `network_los.tables`.
    pub fn required_tables(self) -> Vec<&'static str> {
        match self {
            ZoneSystem::One => Vec::new(),
            ZoneSystem::Two => REQUIRED_TWO_ZONE_TABLES.to_vec(),
            ZoneSystem::Three => REQUIRED_TWO_ZONE_TABLES
                .iter()
                .chain(REQUIRED_THREE_ZONE_TABLES.iter())
                .copied()
                .collect(),
        }
    }
}

impl TryFrom<u8> for ZoneSystem {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(ZoneSystem::One),
            2 => Ok(ZoneSystem::Two),
            3 => Ok(ZoneSystem::Three),
            other => Err(Error::Config(format!("unrecognized zone_system: {other}"))),
        }
    }
}

impl From<ZoneSystem> for u8 {
    fn from(zs: ZoneSystem) -> u8 {
        match zs {
            ZoneSystem::One => 1,
            ZoneSystem::Two => 2,
            ZoneSystem::Three => 3,
        }
    }
}

impl fmt::Display for ZoneSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZoneSystem::One => write!(f, "ONE_ZONE"),
            ZoneSystem::Two => write!(f, "TWO_ZONE"),
            ZoneSystem::Three => write!(f, "THREE_ZONE"),
        }
    }
}

// ============================================================================
// File lists
// ============================================================================

/// One or more file identifiers. Accepts either a bare string or a list.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "OneOrMany", into = "Vec<String>")]
pub struct FileList(SmallVec<[String; 2]>);

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for FileList {
    fn from(v: OneOrMany) -> Self {
        match v {
            OneOrMany::One(s) => FileList(SmallVec::from_iter([s])),
            OneOrMany::Many(v) => FileList(SmallVec::from_vec(v)),
        }
    }
}

impl From<FileList> for Vec<String> {
    fn from(v: FileList) -> Self {
        v.0.into_vec()
    }
}

impl<S: Into<String>> FromIterator<S> for FileList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        FileList(iter.into_iter().map(Into::into).collect())
    }
}

impl FileList {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.to_vec()
    }
}

/// One or more directories (`data_dir` may be a string or a list).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "OneOrMany", into = "Vec<String>")]
pub struct DirList(Vec<String>);

impl From<OneOrMany> for DirList {
    fn from(v: OneOrMany) -> Self {
        match v {
            OneOrMany::One(s) => DirList(vec![s]),
            OneOrMany::Many(v) => DirList(v),
        }
    }
}

impl From<DirList> for Vec<String> {
    fn from(v: DirList) -> Self {
        v.0
    }
}

impl DirList {
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.0.iter().map(Path::new)
    }
}

// ============================================================================
// Settings
// ============================================================================

/// The `network_los` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkLosSettings {
    pub zone_system: ZoneSystem,
    /// skim_tag → matrix source file(s).
    pub skims: BTreeMap<String, FileList>,
    /// logical table name → file(s).
    #[serde(default)]
    pub tables: BTreeMap<String, FileList>,
    /// Element type shared by every skim buffer.
    #[serde(default)]
    pub skim_dtype: SkimDtype,
}

impl NetworkLosSettings {
    /// Files for a skim tag.
    pub fn skim_files(&self, skim_tag: &str) -> Option<&FileList> {
        self.skims.get(skim_tag)
    }

    /// Files for a named table.
    pub fn table_files(&self, table_name: &str) -> Option<&FileList> {
        self.tables.get(table_name)
    }

    /// Skim tags in sorted order.
    pub fn skim_tags(&self) -> impl Iterator<Item = &str> {
        self.skims.keys().map(String::as_str)
    }

    /// Check zone system requirements.
    pub fn validate(&self) -> Result<()> {
        if self.skims.is_empty() {
            return Err(Error::Config(format!("'skims' list not found in {LOS_SETTINGS_NAME} settings")));
        }
        for (tag, files) in &self.skims {
            if files.is_empty() {
                return Err(Error::Config(format!("no files listed for skim tag '{tag}'")));
            }
        }
        if self.skim_files(REQUIRED_SKIM_TAG).is_none() {
            return Err(Error::Config(format!(
                "'{REQUIRED_SKIM_TAG}' skims not listed in {LOS_SETTINGS_NAME}.skims"
            )));
        }
        for table_name in self.zone_system.required_tables() {
            if self.table_files(table_name).is_none() {
                return Err(Error::Config(format!(
                    "'{table_name}' file name not listed in {LOS_SETTINGS_NAME}.tables for {}",
                    self.zone_system
                )));
            }
        }
        Ok(())
    }
}

/// The `skim_time_periods` block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkimTimePeriods {
    /// Period labels to retain (e.g. `["EA", "AM", "MD", "PM", "EV"]`).
    pub labels: Vec<String>,
}

/// Run settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub network_los: NetworkLosSettings,
    #[serde(default)]
    pub skim_time_periods: Option<SkimTimePeriods>,
    #[serde(default)]
    pub read_skim_cache: bool,
    #[serde(default)]
    pub write_skim_cache: bool,
    #[serde(default)]
    pub skim_cache_dir: Option<PathBuf>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub data_dir: DirList,
    #[serde(default)]
    pub checkpoint_dir: Option<PathBuf>,
    #[serde(default)]
    pub rng_base_seed: Option<u64>,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub resume_after: Option<String>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

impl Settings {
    /// Parse and validate settings from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(s)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse and validate settings from an already decoded JSON value.
    pub fn from_json_value(v: serde_json::Value) -> Result<Self> {
        let settings: Settings = serde_json::from_value(v)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse and validate settings from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Reject malformed combinations.
    pub fn validate(&self) -> Result<()> {
        if self.read_skim_cache && self.write_skim_cache {
            return Err(Error::Config(
                "read_skim_cache and write_skim_cache are both true; they are mutually exclusive".into(),
            ));
        }
        self.network_los.validate()
    }

    /// Period labels to retain, if configured.
    pub fn time_period_labels(&self) -> Option<&[String]> {
        self.skim_time_periods
            .as_ref()
            .map(|p| p.labels.as_slice())
            .filter(|labels| !labels.is_empty())
    }

    /// Directory for `cached_<tag>.mmap` files; defaults to the output dir.
    pub fn skim_cache_dir(&self) -> PathBuf {
        self.skim_cache_dir.clone().unwrap_or_else(|| self.output_dir.clone())
    }

    /// Directory for the file checkpoint store.
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.checkpoint_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.join("pipeline"))
    }

    /// Cache behaviour for skim loading.
    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            read: self.read_skim_cache,
            write: self.write_skim_cache,
            dir: self.skim_cache_dir(),
        }
    }

    /// Resolve a mandatory data file against the data directories.
    ///
    /// Absolute paths are taken as-is; relative names are searched in each
    /// `data_dir` in order and the first existing match wins.
    pub fn data_file_path(&self, file_name: &str) -> Result<PathBuf> {
        let candidate = Path::new(file_name);
        if candidate.is_absolute() {
            if candidate.exists() {
                return Ok(candidate.to_path_buf());
            }
            return Err(Error::NotFound(format!("data file '{file_name}'")));
        }
        for dir in self.data_dir.paths() {
            let path = dir.join(candidate);
            if path.exists() {
                return Ok(path);
            }
        }
        Err(Error::NotFound(format!(
            "data file '{file_name}' in data dirs {:?}",
            self.data_dir.0
        )))
    }
}

/// Skim cache flags, resolved from [`Settings`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub read: bool,
    pub write: bool,
    pub dir: PathBuf,
}

impl CacheSettings {
    /// No cache in either direction.
    pub fn disabled() -> Self {
        Self { read: false, write: false, dir: PathBuf::new() }
    }

    pub fn validate(&self) -> Result<()> {
        if self.read && self.write {
            return Err(Error::Config(
                "read_skim_cache and write_skim_cache are both true; they are mutually exclusive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn two_zone() -> serde_json::Value {
        json!({
            "network_los": {
                "zone_system": 2,
                "skims": { "taz": ["skims1.omx", "skims2.omx"] },
                "tables": { "maz_to_maz": "maz_to_maz_walk.csv", "maz_to_taz": "maz_to_taz.csv" }
            },
            "skim_time_periods": { "labels": ["AM", "PM"] },
            "data_dir": "data"
        })
    }

    #[test]
    fn test_parse_two_zone() {
        let s = Settings::from_json_value(two_zone()).unwrap();
        assert_eq!(s.network_los.zone_system, ZoneSystem::Two);
        let files: Vec<&str> = s.network_los.skim_files("taz").unwrap().iter().collect();
        assert_eq!(files, vec!["skims1.omx", "skims2.omx"]);
        assert_eq!(s.network_los.table_files("maz_to_taz").unwrap().len(), 1);
        assert_eq!(s.time_period_labels().unwrap(), &["AM".to_string(), "PM".to_string()]);
        assert_eq!(s.skim_cache_dir(), PathBuf::from("output"));
        assert_eq!(s.network_los.skim_dtype, SkimDtype::Float32);
    }

    #[test]
    fn test_unknown_zone_system() {
        let mut v = two_zone();
        v["network_los"]["zone_system"] = json!(4);
        assert!(Settings::from_json_value(v).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mut v = two_zone();
        v["skim_cache_directory"] = json!("cache");
        assert!(Settings::from_json_value(v).is_err());
    }

    #[test]
    fn test_time_periods_take_labels_only() {
        let mut v = two_zone();
        v["skim_time_periods"] = json!({ "labels": [] });
        assert!(Settings::from_json_value(v.clone()).unwrap().time_period_labels().is_none());

        v["skim_time_periods"] = json!({ "labels": ["AM"], "periods": [0, 6, 24] });
        assert!(Settings::from_json_value(v).is_err());
    }

    #[test]
    fn test_cache_flags_exclusive() {
        let mut v = two_zone();
        v["read_skim_cache"] = json!(true);
        v["write_skim_cache"] = json!(true);
        let err = Settings::from_json_value(v).unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn test_missing_required_table() {
        let mut v = two_zone();
        v["network_los"]["tables"] = json!({ "maz_to_taz": "maz_to_taz.csv" });
        let err = Settings::from_json_value(v).unwrap_err();
        assert!(err.to_string().contains("maz_to_maz"));
    }

    #[test]
    fn test_three_zone_requires_tap_table() {
        let mut v = two_zone();
        v["network_los"]["zone_system"] = json!(3);
        let err = Settings::from_json_value(v).unwrap_err();
        assert!(err.to_string().contains("maz_to_tap"));
    }

    #[test]
    fn test_taz_tag_required() {
        let mut v = two_zone();
        v["network_los"]["skims"] = json!({ "maz": "maz.omx" });
        assert!(Settings::from_json_value(v).is_err());
    }

    #[test]
    fn test_unsupported_dtype() {
        let mut v = two_zone();
        v["network_los"]["skim_dtype"] = json!("int8");
        let err = Settings::from_json_value(v).unwrap_err();
        assert!(err.to_string().contains("int8"));
    }
}
