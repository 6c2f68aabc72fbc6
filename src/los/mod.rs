//! # Network LOS
//!
//! Level-of-service façade: owns the skim catalogs and dictionaries for
//! every skim tag plus the MAZ-level zone tables, and answers the queries
//! model steps make.
//!
//! ```text
//! Unconfigured ─read_los_settings─▶ SettingsRead ─load_skim_info─▶ SkimsCatalogued
//!      ─load_all_tables─▶ TablesLoaded ─load_all_skims / attach_shared_buffers─▶ Ready
//! ```
//!
//! Once `Ready` the façade is read-only and can be shared with `Arc`.

pub mod zone_pairs;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::config::{Settings, ZoneSystem, REQUIRED_SKIM_TAG};
use crate::model::{Column, Table};
use crate::skim::{
    load_skims, MatrixSourceProvider, SharedSkimBuffers, SkimBuffer, SkimCatalog, SkimDict, SkimKey,
};
use crate::{Error, Result};

pub use zone_pairs::ZonePairTable;

/// Where a [`NetworkLos`] is in its load sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LosStage {
    Unconfigured,
    SettingsRead,
    SkimsCatalogued,
    TablesLoaded,
    Ready,
}

impl fmt::Display for LosStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LosStage::Unconfigured => "unconfigured",
            LosStage::SettingsRead => "settings-read",
            LosStage::SkimsCatalogued => "skims-catalogued",
            LosStage::TablesLoaded => "tables-loaded",
            LosStage::Ready => "ready",
        };
        f.write_str(s)
    }
}

/// Skims and zone tables for one run.
pub struct NetworkLos {
    settings: Arc<Settings>,
    sources: Box<dyn MatrixSourceProvider>,
    stage: LosStage,
    zone_system: Option<ZoneSystem>,
    skim_time_periods: Option<Vec<String>>,
    catalogs: BTreeMap<String, Arc<SkimCatalog>>,
    skim_dicts: BTreeMap<String, SkimDict>,
    maz_taz: Option<Table>,
    maz_to_maz: Option<ZonePairTable>,
    maz_to_tap: Option<ZonePairTable>,
}

impl fmt::Debug for NetworkLos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkLos")
            .field("stage", &self.stage)
            .field("zone_system", &self.zone_system)
            .field("skim_tags", &self.catalogs.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl NetworkLos {
    pub fn new(settings: Arc<Settings>, sources: Box<dyn MatrixSourceProvider>) -> Self {
        Self {
            settings,
            sources,
            stage: LosStage::Unconfigured,
            zone_system: None,
            skim_time_periods: None,
            catalogs: BTreeMap::new(),
            skim_dicts: BTreeMap::new(),
            maz_taz: None,
            maz_to_maz: None,
            maz_to_tap: None,
        }
    }

    pub fn stage(&self) -> LosStage {
        self.stage
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    fn require(&self, allowed: &[LosStage], operation: &str) -> Result<()> {
        if allowed.contains(&self.stage) {
            return Ok(());
        }
        Err(Error::State(format!(
            "network_los.{operation} called in stage {}, expected one of {}",
            self.stage,
            allowed.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
        )))
    }

    // ========================================================================
    // Load sequence
    // ========================================================================

    /// Validate and take the `network_los` settings.
    pub fn read_los_settings(&mut self) -> Result<()> {
        self.require(&[LosStage::Unconfigured], "read_los_settings")?;
        self.settings.validate()?;
        let zone_system = self.settings.network_los.zone_system;
        self.zone_system = Some(zone_system);
        self.skim_time_periods = self.settings.time_period_labels().map(<[String]>::to_vec);
        tracing::info!(%zone_system, skim_tags = self.settings.network_los.skims.len(), "read network_los settings");
        self.stage = LosStage::SettingsRead;
        Ok(())
    }

    /// Build a catalog for every skim tag.
    pub fn load_skim_info(&mut self) -> Result<()> {
        self.require(&[LosStage::SettingsRead], "load_skim_info")?;
        let los = &self.settings.network_los;
        let mut catalogs = BTreeMap::new();
        for skim_tag in los.skim_tags() {
            let files = los
                .skim_files(skim_tag)
                .map(|f| f.to_vec())
                .unwrap_or_default();
            let catalog = SkimCatalog::build(
                skim_tag,
                &files,
                self.skim_time_periods.as_deref(),
                los.skim_dtype,
                self.sources.as_ref(),
            )?;
            catalogs.insert(skim_tag.to_string(), Arc::new(catalog));
        }
        self.catalogs = catalogs;
        self.stage = LosStage::SkimsCatalogued;
        Ok(())
    }

    /// Read the MAZ tables the zone system needs. No-op for ONE_ZONE.
    pub fn load_all_tables(&mut self) -> Result<()> {
        self.require(&[LosStage::SkimsCatalogued], "load_all_tables")?;
        let zone_system = self.zone_system()?;

        if zone_system.has_maz() {
            let maz_taz = self.read_maz_to_taz()?;
            let max_maz = maz_taz
                .max_index()
                .ok_or_else(|| Error::Table("maz_to_taz is empty".into()))?;
            let cardinality = max_maz + 1;

            let m2m = self.read_tables("maz_to_maz")?;
            self.maz_to_maz = Some(ZonePairTable::from_tables("maz_to_maz", "OMAZ", "DMAZ", cardinality, &m2m)?);
            self.maz_taz = Some(maz_taz);
        }

        if zone_system == ZoneSystem::Three {
            let m2t = self.read_tables("maz_to_tap")?;
            let mut max_tap: Option<i64> = None;
            for (source_id, table) in &m2t {
                let taps = table.column("TAP")?.as_int().ok_or_else(|| {
                    Error::Table(format!("maz_to_tap ({source_id}): column 'TAP' must be integer"))
                })?;
                max_tap = max_tap.max(taps.iter().copied().max());
            }
            let cardinality = max_tap.ok_or_else(|| Error::Table("maz_to_tap is empty".into()))? + 1;
            self.maz_to_tap = Some(ZonePairTable::from_tables("maz_to_tap", "MAZ", "TAP", cardinality, &m2t)?);
        }

        self.stage = LosStage::TablesLoaded;
        Ok(())
    }

    fn read_maz_to_taz(&self) -> Result<Table> {
        let mut tables = self.read_tables_indexed("maz_to_taz", Some("MAZ"))?;
        if tables.len() != 1 {
            return Err(Error::Config(format!(
                "maz_to_taz must be a single file, got {}",
                tables.len()
            )));
        }
        let (source_id, table) = tables.remove(0);
        if !matches!(table.column("TAZ")?, Column::Int(_)) {
            return Err(Error::Table(format!("maz_to_taz ({source_id}): column 'TAZ' must be integer")));
        }
        tracing::info!(mazs = table.len(), source = %source_id, "loaded maz_to_taz");
        Ok(table)
    }

    fn read_tables(&self, table_name: &str) -> Result<Vec<(String, Table)>> {
        self.read_tables_indexed(table_name, None)
    }

    fn read_tables_indexed(&self, table_name: &str, index_col: Option<&str>) -> Result<Vec<(String, Table)>> {
        let files = self
            .settings
            .network_los
            .table_files(table_name)
            .ok_or_else(|| Error::Config(format!("'{table_name}' not listed in network_los.tables")))?;
        files
            .iter()
            .map(|file| {
                let path = self.settings.data_file_path(file)?;
                tracing::debug!(table = table_name, path = %path.display(), "reading zone table");
                Ok((file.to_string(), Table::from_csv_path(&path, index_col)?))
            })
            .collect()
    }

    /// Allocate private buffers and load every skim tag.
    pub fn load_all_skims(&mut self) -> Result<()> {
        self.require(&[LosStage::TablesLoaded], "load_all_skims")?;
        let cache = self.settings.cache_settings();
        let mut dicts = BTreeMap::new();
        for (skim_tag, catalog) in &self.catalogs {
            let mut buffer = SkimBuffer::allocate(catalog, false)?;
            load_skims(catalog, self.sources.as_ref(), &cache, &mut buffer)?;
            dicts.insert(skim_tag.clone(), SkimDict::new(Arc::clone(catalog), Arc::new(buffer))?);
        }
        self.skim_dicts = dicts;
        self.stage = LosStage::Ready;
        tracing::info!(skim_tags = self.skim_dicts.len(), "network_los ready");
        Ok(())
    }

    /// Allocate one shared buffer per skim tag, unloaded.
    pub fn allocate_shared_skim_buffers(&self) -> Result<SharedSkimBuffers> {
        self.require(
            &[LosStage::SkimsCatalogued, LosStage::TablesLoaded],
            "allocate_shared_skim_buffers",
        )?;
        let mut shared = SharedSkimBuffers::new();
        for catalog in self.catalogs.values() {
            shared.insert(SkimBuffer::allocate(catalog, true)?);
        }
        Ok(shared)
    }

    /// Load every shared buffer. Must run once, before any worker attaches.
    pub fn load_shared_data(&self, shared: &mut SharedSkimBuffers) -> Result<()> {
        self.require(&[LosStage::SkimsCatalogued, LosStage::TablesLoaded], "load_shared_data")?;
        let cache = self.settings.cache_settings();
        for (skim_tag, catalog) in &self.catalogs {
            let buffer = shared.get_mut(skim_tag)?;
            load_skims(catalog, self.sources.as_ref(), &cache, buffer)?;
        }
        tracing::info!(skim_tags = shared.len(), "loaded shared skim buffers");
        Ok(())
    }

    /// Serve lookups from already loaded shared buffers.
    pub fn attach_shared_buffers(&mut self, shared: &SharedSkimBuffers) -> Result<()> {
        self.require(&[LosStage::TablesLoaded], "attach_shared_buffers")?;
        let mut dicts = BTreeMap::new();
        for (skim_tag, catalog) in &self.catalogs {
            let buffer = shared
                .get(skim_tag)
                .ok_or_else(|| Error::NotFound(format!("shared skim buffer '{skim_tag}'")))?;
            dicts.insert(skim_tag.clone(), SkimDict::new(Arc::clone(catalog), Arc::clone(buffer))?);
        }
        self.skim_dicts = dicts;
        self.stage = LosStage::Ready;
        Ok(())
    }

    fn unavailable(&self, operation: &str) -> Error {
        match self.zone_system {
            Some(zs) => Error::State(format!("{operation} not available for {zs}")),
            None => Error::State(format!("{operation} called before network_los settings were read")),
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn zone_system(&self) -> Result<ZoneSystem> {
        self.zone_system
            .ok_or_else(|| Error::State("network_los settings have not been read".into()))
    }

    /// Retained period labels, if configured.
    pub fn skim_time_period_labels(&self) -> Option<&[String]> {
        self.skim_time_periods.as_deref()
    }

    pub fn catalog(&self, skim_tag: &str) -> Result<&Arc<SkimCatalog>> {
        self.catalogs
            .get(skim_tag)
            .ok_or_else(|| Error::NotFound(format!("skim tag '{skim_tag}'")))
    }

    pub fn get_skim_dict(&self, skim_tag: &str) -> Result<&SkimDict> {
        self.require(&[LosStage::Ready], "get_skim_dict")?;
        self.skim_dicts
            .get(skim_tag)
            .ok_or_else(|| Error::NotFound(format!("skim tag '{skim_tag}'")))
    }

    /// The `taz` skims.
    pub fn get_default_skim_dict(&self) -> Result<&SkimDict> {
        self.get_skim_dict(REQUIRED_SKIM_TAG)
    }

    pub fn skim_lookup(&self, skim_tag: &str, origins: &[i64], destinations: &[i64], key: &SkimKey) -> Result<Vec<f64>> {
        self.get_skim_dict(skim_tag)?.lookup(origins, destinations, key)
    }

    pub fn maz_to_maz(&self) -> Option<&ZonePairTable> {
        self.maz_to_maz.as_ref()
    }

    pub fn maz_to_tap(&self) -> Option<&ZonePairTable> {
        self.maz_to_tap.as_ref()
    }

    /// `maz_to_maz` attribute per `(origin, destination)` MAZ pair.
    pub fn get_mazpairs(&self, origins: &[i64], destinations: &[i64], attribute: &str) -> Result<Vec<f64>> {
        self.require(&[LosStage::Ready], "get_mazpairs")?;
        self.maz_to_maz
            .as_ref()
            .ok_or_else(|| self.unavailable("get_mazpairs"))?
            .get(origins, destinations, attribute)
    }

    /// `maz_to_tap` attribute per `(maz, tap)` pair.
    pub fn get_maztappairs(&self, mazs: &[i64], taps: &[i64], attribute: &str) -> Result<Vec<f64>> {
        self.require(&[LosStage::Ready], "get_maztappairs")?;
        self.maz_to_tap
            .as_ref()
            .ok_or_else(|| self.unavailable("get_maztappairs"))?
            .get(mazs, taps, attribute)
    }

    /// TAZ containing each MAZ.
    pub fn get_taz_for_maz(&self, mazs: &[i64]) -> Result<Vec<i64>> {
        self.require(&[LosStage::TablesLoaded, LosStage::Ready], "get_taz_for_maz")?;
        let table = self
            .maz_taz
            .as_ref()
            .ok_or_else(|| self.unavailable("get_taz_for_maz"))?;
        let taz = table
            .column("TAZ")?
            .as_int()
            .ok_or_else(|| Error::Table("maz_to_taz column 'TAZ' must be integer".into()))?;
        Ok(table.positions_of(mazs)?.into_iter().map(|pos| taz[pos]).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skim::{InMemoryMatrices, MatrixData, MatrixFile};
    use serde_json::json;

    fn one_zone() -> NetworkLos {
        let settings = Settings::from_json_value(json!({
            "network_los": { "zone_system": 1, "skims": { "taz": "skims.omx" } }
        }))
        .unwrap();
        let skims = MatrixFile::new("skims.omx", (2, 2))
            .with_matrix("DIST", MatrixData::Float32(vec![0.0, 1.0, 1.0, 0.0]))
            .unwrap();
        let sources = InMemoryMatrices::new().with_file("skims.omx", skims);
        NetworkLos::new(Arc::new(settings), Box::new(sources))
    }

    #[test]
    fn test_stage_order_enforced() {
        let mut los = one_zone();
        assert!(matches!(los.load_skim_info(), Err(Error::State(_))));
        los.read_los_settings().unwrap();
        assert!(matches!(los.read_los_settings(), Err(Error::State(_))));
        los.load_skim_info().unwrap();
        assert!(los.get_skim_dict("taz").is_err());
        los.load_all_tables().unwrap();
        los.load_all_skims().unwrap();
        assert_eq!(los.stage(), LosStage::Ready);
    }

    #[test]
    fn test_one_zone_lookup() {
        let mut los = one_zone();
        los.read_los_settings().unwrap();
        los.load_skim_info().unwrap();
        los.load_all_tables().unwrap();
        los.load_all_skims().unwrap();
        let v = los.skim_lookup("taz", &[1, 2], &[2, 2], &SkimKey::scalar("DIST")).unwrap();
        assert_eq!(v, vec![1.0, 0.0]);
        assert!(matches!(los.get_mazpairs(&[1], &[2], "DIST"), Err(Error::State(_))));
    }
}
