use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, error};

use crate::classify::ResourceKind;
use crate::models::{OriginModel, TargetModel};
use crate::{ConverterError, Result};

const BUILTIN_DATASET: &str = include_str!("../data/mappings.json");

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    Rename,
    StructuralDowngrade,
    FallbackSubstitute,
}

impl TransformKind {
    pub fn describe(&self) -> &'static str {
        match self {
            TransformKind::Rename => "rename",
            TransformKind::StructuralDowngrade => "structural downgrade",
            TransformKind::FallbackSubstitute => "fallback substitute",
        }
    }

    /// Kind assumed for table values given as a bare name.
    fn default_for(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Style => TransformKind::StructuralDowngrade,
            ResourceKind::Sound => TransformKind::Rename,
            ResourceKind::PcmSample => TransformKind::FallbackSubstitute,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct MappingEntry {
    pub source_name: String,
    pub target_name: String,
    pub transform_kind: TransformKind,
}

/// Canonical source name -> entry. Lookups are exact.
#[derive(Clone, Debug, Default, Serialize)]
pub struct MappingTable {
    entries: BTreeMap<String, MappingEntry>,
}

impl MappingTable {
    pub fn get(&self, canonical_name: &str) -> Option<&MappingEntry> {
        self.entries.get(canonical_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MappingEntry> {
        self.entries.values()
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct MappingSet {
    pub origin: OriginModel,
    pub target: TargetModel,
    pub version: String,
    pub styles: MappingTable,
    pub sounds: MappingTable,
    pub pcms: MappingTable,
}

impl MappingSet {
    pub fn table(&self, kind: ResourceKind) -> &MappingTable {
        match kind {
            ResourceKind::Style => &self.styles,
            ResourceKind::Sound => &self.sounds,
            ResourceKind::PcmSample => &self.pcms,
        }
    }

    pub fn lookup(&self, kind: ResourceKind, canonical_name: &str) -> Option<&MappingEntry> {
        self.table(kind).get(canonical_name)
    }

    pub fn is_empty(&self) -> bool {
        self.styles.is_empty() && self.sounds.is_empty() && self.pcms.is_empty()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Name(String),
    Detailed { target: String, kind: TransformKind },
}

#[derive(Deserialize)]
struct RawMeta {
    version: String,
}

#[derive(Deserialize)]
struct RawMappingSet {
    meta: RawMeta,
    #[serde(default)]
    styles: BTreeMap<String, RawEntry>,
    #[serde(default)]
    sounds: BTreeMap<String, RawEntry>,
    #[serde(default)]
    pcms: BTreeMap<String, RawEntry>,
}

type RawDataset = BTreeMap<String, BTreeMap<String, RawMappingSet>>;

fn build_table(kind: ResourceKind, raw: BTreeMap<String, RawEntry>) -> MappingTable {
    let entries = raw
        .into_iter()
        .map(|(source_name, entry)| {
            let (target_name, transform_kind) = match entry {
                RawEntry::Name(target) => (target, TransformKind::default_for(kind)),
                RawEntry::Detailed { target, kind } => (target, kind),
            };
            let entry = MappingEntry {
                source_name: source_name.clone(),
                target_name,
                transform_kind,
            };
            (source_name, entry)
        })
        .collect();
    MappingTable { entries }
}

/// Read-only registry of mapping sets keyed by (origin, target).
///
/// Holds at most one set per pair. A pair without a set has no known
/// downgrade path.
#[derive(Clone, Debug, Default)]
pub struct MappingRepository {
    sets: BTreeMap<(OriginModel, TargetModel), MappingSet>,
}

impl MappingRepository {
    /// The dataset compiled into the binary, parsed once per process.
    pub fn builtin() -> &'static MappingRepository {
        static BUILTIN: OnceLock<MappingRepository> = OnceLock::new();
        BUILTIN.get_or_init(|| {
            MappingRepository::from_json_str(BUILTIN_DATASET).unwrap_or_else(|err| {
                error!("built-in mapping dataset is invalid: {err}");
                MappingRepository::default()
            })
        })
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut repository = MappingRepository::default();
        repository.merge_json_str(json)?;
        Ok(repository)
    }

    /// Overlay a dataset. Each pair it names replaces the existing set for
    /// that pair; a pair with only empty tables removes it.
    pub fn merge_json_str(&mut self, json: &str) -> Result<()> {
        let raw: RawDataset = serde_json::from_str(json)?;

        for (origin, targets) in raw {
            let origin: OriginModel = origin
                .parse()
                .map_err(|e| ConverterError::Config(format!("mapping dataset: {e}")))?;
            for (target, set) in targets {
                let target: TargetModel = target
                    .parse()
                    .map_err(|e| ConverterError::Config(format!("mapping dataset: {e}")))?;

                let set = MappingSet {
                    origin,
                    target,
                    version: set.meta.version,
                    styles: build_table(ResourceKind::Style, set.styles),
                    sounds: build_table(ResourceKind::Sound, set.sounds),
                    pcms: build_table(ResourceKind::PcmSample, set.pcms),
                };

                if set.is_empty() {
                    debug!("{origin} -> {target}: empty mapping set, pair left unmapped");
                    self.sets.remove(&(origin, target));
                } else {
                    debug!(
                        "{origin} -> {target}: mapping set {} ({} styles, {} sounds, {} pcms)",
                        set.version,
                        set.styles.len(),
                        set.sounds.len(),
                        set.pcms.len()
                    );
                    self.sets.insert((origin, target), set);
                }
            }
        }

        Ok(())
    }

    pub fn merge_file(&mut self, path: &Path) -> Result<()> {
        let json = fs::read_to_string(path).map_err(|e| {
            ConverterError::Config(format!(
                "cannot read mapping file {}: {}",
                path.display(),
                e
            ))
        })?;
        self.merge_json_str(&json)
    }

    pub fn lookup(&self, origin: OriginModel, target: TargetModel) -> Option<&MappingSet> {
        self.sets.get(&(origin, target))
    }

    pub fn sets(&self) -> impl Iterator<Item = &MappingSet> {
        self.sets.values()
    }

    /// Human-readable dump of every registered pair.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        if self.sets.is_empty() {
            out.push_str("(no mapping sets registered)\n");
            return out;
        }
        for set in self.sets.values() {
            out.push_str(&format!(
                "{} -> {} (version {})\n",
                set.origin, set.target, set.version
            ));
            for kind in ResourceKind::ALL {
                for entry in set.table(*kind).iter() {
                    out.push_str(&format!(
                        "  {}: {} -> {} [{}]\n",
                        kind.label(),
                        entry.source_name,
                        entry.target_name,
                        entry.transform_kind.describe()
                    ));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_dataset_parses() {
        let repo = MappingRepository::from_json_str(BUILTIN_DATASET).unwrap();
        let set = repo.lookup(OriginModel::Pa4x, TargetModel::Pa3x).unwrap();
        assert_eq!(set.version, "0.2-demo");
        assert_eq!(set.sounds.len(), 2);
        assert_eq!(
            set.lookup(ResourceKind::Style, "POP Modern Ballad").unwrap().target_name,
            "POP Modern Ballad (PA3X)"
        );
    }

    #[test]
    fn empty_set_is_not_registered() {
        let repo = MappingRepository::builtin();
        assert!(repo.lookup(OriginModel::Pa5x, TargetModel::Pa900).is_none());
        assert!(repo.lookup(OriginModel::Pa5x, TargetModel::Pa3x).is_none());
    }

    #[test]
    fn lookup_is_exact() {
        let repo = MappingRepository::builtin();
        let set = repo.lookup(OriginModel::Pa4x, TargetModel::Pa600).unwrap();
        assert!(set.lookup(ResourceKind::Sound, "Grand Piano 4K").is_some());
        assert!(set.lookup(ResourceKind::Sound, "grand piano 4k").is_none());
        assert!(set.lookup(ResourceKind::Sound, "Grand Piano").is_none());
        assert!(set.lookup(ResourceKind::Style, "Grand Piano 4K").is_none());
    }

    #[test]
    fn bare_names_take_table_default_kind() {
        let set = MappingRepository::builtin()
            .lookup(OriginModel::Pa4x, TargetModel::Pa3x)
            .unwrap();
        assert_eq!(
            set.lookup(ResourceKind::Style, "POP Modern Ballad").unwrap().transform_kind,
            TransformKind::StructuralDowngrade
        );
        assert_eq!(
            set.lookup(ResourceKind::Sound, "Analog Pad X").unwrap().transform_kind,
            TransformKind::Rename
        );
        assert_eq!(
            set.lookup(ResourceKind::PcmSample, "StudioStringsHQ").unwrap().transform_kind,
            TransformKind::FallbackSubstitute
        );
    }

    #[test]
    fn overlay_replaces_pair() {
        let mut repo = MappingRepository::from_json_str(BUILTIN_DATASET).unwrap();
        repo.merge_json_str(
            r#"{ "PA4X": { "PA3X": {
                "meta": { "version": "1.0" },
                "pcms": { "Choir": { "target": "Voices", "kind": "rename" } }
            } } }"#,
        )
        .unwrap();

        let set = repo.lookup(OriginModel::Pa4x, TargetModel::Pa3x).unwrap();
        assert_eq!(set.version, "1.0");
        assert!(set.styles.is_empty());
        let entry = set.lookup(ResourceKind::PcmSample, "Choir").unwrap();
        assert_eq!(entry.target_name, "Voices");
        assert_eq!(entry.transform_kind, TransformKind::Rename);
    }

    #[test]
    fn overlay_with_empty_tables_removes_pair() {
        let mut repo = MappingRepository::from_json_str(BUILTIN_DATASET).unwrap();
        repo.merge_json_str(r#"{ "PA4X": { "PA600": { "meta": { "version": "x" } } } }"#)
            .unwrap();
        assert!(repo.lookup(OriginModel::Pa4x, TargetModel::Pa600).is_none());
    }

    #[test]
    fn unknown_model_in_dataset_is_config_error() {
        let err = MappingRepository::from_json_str(
            r#"{ "PA4X": { "PA1": { "meta": { "version": "x" } } } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConverterError::Config(_)));
    }

    #[test]
    fn malformed_json_is_mapping_error() {
        let err = MappingRepository::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ConverterError::Mapping(_)));
    }
}
