use serde::Serialize;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::REPORT_FILE_NAME;

/// Extensions that say nothing about the resource name and are stripped
/// before deriving a canonical name.
const KNOWN_EXTENSIONS: &[&str] = &["gz", "sty", "style", "snd", "sound", "pcg", "wav", "pcm"];

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum ResourceKind {
    Style,
    Sound,
    PcmSample,
}

impl ResourceKind {
    /// Report grouping order.
    pub const ALL: &'static [ResourceKind] =
        &[ResourceKind::Style, ResourceKind::Sound, ResourceKind::PcmSample];

    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::Style => "STYLE",
            ResourceKind::Sound => "SOUND",
            ResourceKind::PcmSample => "PCM",
        }
    }

    fn indicator(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::Style => &["style"],
            ResourceKind::Sound => &["sound"],
            ResourceKind::PcmSample => &["pcm", "wav"],
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One classified entry of the working tree.
#[derive(Clone, Debug, Serialize)]
pub struct ResourceDescriptor {
    pub kind: ResourceKind,
    pub canonical_name: String,
    /// Entry name relative to the working tree root, `/`-separated.
    pub entry: String,
    /// Location of the bytes; read lazily when the resource is re-encoded.
    #[serde(skip)]
    pub path: PathBuf,
}

impl ResourceDescriptor {
    pub fn read_bytes(&self) -> io::Result<Vec<u8>> {
        fs::read(&self.path)
    }
}

#[derive(Debug, Default)]
pub struct Classification {
    pub resources: Vec<ResourceDescriptor>,
    /// Entries that matched no resource pattern.
    pub skipped: Vec<String>,
}

fn file_name_of(entry: &str) -> &str {
    entry.rsplit('/').next().unwrap_or(entry)
}

fn split_extension(name: &str) -> Option<(&str, String)> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    Some((stem, ext.to_ascii_lowercase()))
}

/// Tag a file name with its resource kind.
///
/// The extension decides first (looking through one `.gz` layer); when it is
/// not conclusive the indicator words are searched for, in Style, Sound, PCM
/// order.
pub fn classify_file_name(file_name: &str) -> Option<ResourceKind> {
    let mut name = file_name;
    while let Some((stem, ext)) = split_extension(name) {
        let kind = match ext.as_str() {
            "sty" | "style" => Some(ResourceKind::Style),
            "snd" | "sound" | "pcg" => Some(ResourceKind::Sound),
            "wav" | "pcm" => Some(ResourceKind::PcmSample),
            "gz" => {
                name = stem;
                continue;
            }
            _ => None,
        };
        if kind.is_some() {
            return kind;
        }
        break;
    }

    let lower = file_name.to_ascii_lowercase();
    ResourceKind::ALL
        .iter()
        .copied()
        .find(|kind| kind.indicator().iter().any(|word| lower.contains(word)))
}

/// The trailing run of known extensions, as written (`"sty.gz"` for
/// `Bossa.sty.gz`). A remapped resource keeps it so it classifies the same.
pub fn extension_chain(file_name: &str) -> Option<&str> {
    let mut stem = file_name;
    while let Some((rest, ext)) = split_extension(stem) {
        if !KNOWN_EXTENSIONS.contains(&ext.as_str()) {
            break;
        }
        stem = rest;
    }
    file_name
        .get(stem.len() + 1..)
        .filter(|chain| !chain.is_empty())
}

/// Derive the name a resource is looked up by in the mapping tables.
///
/// Known extensions are stripped, underscores become spaces and standalone
/// kind indicator words are dropped. An empty result falls back to the raw
/// file name.
pub fn canonical_name(kind: ResourceKind, file_name: &str) -> String {
    let mut stem = file_name;
    while let Some((rest, ext)) = split_extension(stem) {
        if !KNOWN_EXTENSIONS.contains(&ext.as_str()) {
            break;
        }
        stem = rest;
    }

    let spaced = stem.replace('_', " ");
    let words: Vec<&str> = spaced
        .split_whitespace()
        .filter(|word| {
            !kind
                .indicator()
                .iter()
                .any(|indicator| word.eq_ignore_ascii_case(indicator))
        })
        .collect();

    if words.is_empty() {
        file_name.to_string()
    } else {
        words.join(" ")
    }
}

/// Classify an ordered entry listing rooted at `root`.
///
/// Output order follows the listing order.
pub fn classify_listing(root: &Path, entries: &[String]) -> Classification {
    let mut classification = Classification::default();

    for entry in entries {
        let file_name = file_name_of(entry);
        if entry == REPORT_FILE_NAME {
            debug!(entry = %entry, "ignoring previous conversion report");
            continue;
        }

        match classify_file_name(file_name) {
            Some(kind) => {
                let canonical = canonical_name(kind, file_name);
                debug!(entry = %entry, kind = %kind, name = %canonical, "classified");
                classification.resources.push(ResourceDescriptor {
                    kind,
                    canonical_name: canonical,
                    entry: entry.clone(),
                    path: root.join(entry),
                });
            }
            None => {
                warn!(entry = %entry, "unrecognised entry skipped");
                classification.skipped.push(entry.clone());
            }
        }
    }

    classification
}

/// List every file under `root`, sorted, as `/`-separated relative names.
///
/// A missing or unreadable directory lists as empty.
pub fn list_tree(root: &Path) -> Vec<String> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("cannot read {}: {}", root.display(), err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(root) {
            let parts: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            entries.push(parts.join("/"));
        }
    }
    entries
}
