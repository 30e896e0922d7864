use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

pub mod classify;
pub mod lock;
pub mod mappings;
pub mod models;
pub mod pcm;
pub mod report;
pub mod resolve;
pub mod workspace;

use classify::{classify_listing, extension_chain};
use mappings::MappingRepository;
use pcm::ReencodeJob;
use resolve::{resolve, Decision, Resolution, TransformOutcome};
use workspace::{file_stem_for, NameAllocator, WorkingTree, ZipArchiveWriter};

pub use lock::OutputLock;
pub use models::{OriginModel, SampleProfile, TargetModel};
pub use report::{ConversionRun, ConvertResult, ConvertStats};
pub use workspace::ArchiveWriter;

/// Name of the report written into every output archive.
pub const REPORT_FILE_NAME: &str = "CONVERSION_REPORT.txt";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterSettings {
    pub origin: OriginModel,
    pub target: TargetModel,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub mappings_path: Option<PathBuf>,
    /// Re-encoding worker count; 0 means one per CPU.
    pub reencode_threads: usize,
    pub debug: bool,
}

impl ConverterSettings {
    pub fn new(
        origin: OriginModel,
        target: TargetModel,
        input_path: PathBuf,
        output_path: PathBuf,
    ) -> Self {
        ConverterSettings {
            origin,
            target,
            input_path,
            output_path,
            mappings_path: None,
            reencode_threads: 0,
            debug: false,
        }
    }

    /// `NEW_SET_<TARGET>.zip` next to the input.
    pub fn default_output_path(input: &Path, target: TargetModel) -> PathBuf {
        let dir = input.parent().unwrap_or_else(|| Path::new("."));
        dir.join(format!("NEW_SET_{}.zip", target))
    }
}

#[derive(Debug, Error)]
pub enum ConverterError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("mapping dataset error: {0}")]
    Mapping(#[from] serde_json::Error),
    #[error("failed to prepare working tree: {0}")]
    Extract(String),
    #[error("repackaging into {} failed: {source}", path.display())]
    Repackage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("conversion cancelled")]
    Cancelled,
    #[error("output lock error: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, ConverterError>;

/// Shared flag a caller flips to stop a run between resource steps.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ConverterError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Built-in dataset plus the settings' overlay file, if any.
pub fn load_repository(settings: &ConverterSettings) -> Result<MappingRepository> {
    let mut repository = MappingRepository::builtin().clone();
    if let Some(path) = &settings.mappings_path {
        repository.merge_file(path)?;
        info!("mapping overlay loaded from {}", path.display());
    }
    Ok(repository)
}

pub fn run(settings: ConverterSettings) -> Result<ConvertResult> {
    let repository = load_repository(&settings)?;
    convert(&settings, &repository, &ZipArchiveWriter, &CancelToken::new())
}

/// Run one conversion: classify, resolve, remap and re-encode, then write
/// the report and repackage.
///
/// Per-resource problems end up in the report. Only configuration,
/// cancellation and the final repackaging can fail the run.
pub fn convert(
    settings: &ConverterSettings,
    repository: &MappingRepository,
    writer: &dyn ArchiveWriter,
    cancel: &CancelToken,
) -> Result<ConvertResult> {
    convert_with_progress(settings, repository, writer, cancel, &|_| {})
}

/// [`convert`], calling `progress` with every outcome as soon as it is
/// settled. Style and sound outcomes arrive in listing order while the tree
/// is being remapped; sample outcomes follow once re-encoding has joined.
pub fn convert_with_progress(
    settings: &ConverterSettings,
    repository: &MappingRepository,
    writer: &dyn ArchiveWriter,
    cancel: &CancelToken,
    progress: &dyn Fn(&TransformOutcome),
) -> Result<ConvertResult> {
    let started = Instant::now();

    if !settings.input_path.exists() {
        return Err(ConverterError::Config(format!(
            "Input path does not exist: {}",
            settings.input_path.display()
        )));
    }

    info!(
        "converting {} ({} -> {})",
        settings.input_path.display(),
        settings.origin,
        settings.target
    );

    let tree = WorkingTree::prepare(&settings.input_path)?;
    cancel.check()?;

    let classification = classify_listing(tree.root(), tree.entries());
    let mut warnings: Vec<String> = tree.warnings().to_vec();
    warnings.extend(
        classification
            .skipped
            .iter()
            .map(|entry| format!("unrecognised entry '{entry}' skipped")),
    );
    info!(
        "classified {} resources, {} entries skipped",
        classification.resources.len(),
        classification.skipped.len()
    );

    let mapping = repository.lookup(settings.origin, settings.target);
    match mapping {
        Some(set) => info!("using mapping set {}", set.version),
        None => warn!(
            "no mapping set for {} -> {}, resources pass through unchanged",
            settings.origin, settings.target
        ),
    }

    let resolutions = resolve(classification.resources, mapping, cancel)?;
    let outcomes = apply(&tree, resolutions, settings, cancel, progress)?;

    let run = ConversionRun::finalize(
        settings.origin,
        settings.target,
        mapping,
        outcomes,
        warnings,
        started.elapsed(),
    );
    let report = run.render();
    fs::write(tree.root().join(REPORT_FILE_NAME), &report)?;

    cancel.check()?;
    writer
        .write_archive(tree.root(), &settings.output_path)
        .map_err(|source| ConverterError::Repackage {
            path: settings.output_path.clone(),
            source,
        })?;
    info!("wrote {}", settings.output_path.display());

    let result = ConvertResult {
        output_archive_path: settings.output_path.clone(),
        report,
        stats: run.stats,
        outcomes: run.outcomes,
    };

    if settings.debug {
        write_debug_result(&settings.output_path, &result);
    }

    Ok(result)
}

fn write_debug_result(output: &Path, result: &ConvertResult) {
    let path = output.with_file_name("conversion_result.json");
    match serde_json::to_string_pretty(result) {
        Ok(json) => {
            if let Err(e) = fs::write(&path, json) {
                warn!("cannot write {}: {}", path.display(), e);
            }
        }
        Err(e) => warn!("cannot serialise conversion result: {}", e),
    }
}

/// Carry out every resolution against the working tree and produce exactly
/// one outcome per resource, in listing order.
///
/// A source name is released only once its file has left the tree, so no
/// later remap can land on a file that is still waiting to be re-encoded or
/// that failed to move.
fn apply(
    tree: &WorkingTree,
    resolutions: Vec<Resolution>,
    settings: &ConverterSettings,
    cancel: &CancelToken,
    progress: &dyn Fn(&TransformOutcome),
) -> Result<Vec<TransformOutcome>> {
    let mut names = NameAllocator::new(tree.entries());
    let mut outcomes: Vec<Option<TransformOutcome>> = Vec::with_capacity(resolutions.len());
    let mut jobs = Vec::new();
    let mut pending = Vec::new();

    for (index, resolution) in resolutions.into_iter().enumerate() {
        cancel.check()?;

        let needs_reencode = resolution.needs_reencode();
        let Resolution { resource, decision } = resolution;
        let entry = match decision {
            Decision::Keep => {
                let outcome = TransformOutcome::kept(resource);
                progress(&outcome);
                outcomes.push(Some(outcome));
                continue;
            }
            Decision::Map(entry) => entry,
        };

        let stem = file_stem_for(&entry.target_name);
        if needs_reencode {
            let dest = names.reserve(&resource.entry, &stem, Some("wav"));
            jobs.push(ReencodeJob {
                index,
                name: resource.canonical_name.clone(),
                source: resource.path.clone(),
                dest: tree.root().join(&dest),
            });
            pending.push((resource, entry));
            outcomes.push(None);
            continue;
        }

        let file_name = resource.entry.rsplit('/').next().unwrap_or(&resource.entry);
        let ext = extension_chain(file_name)
            .or_else(|| Path::new(file_name).extension().and_then(|e| e.to_str()));
        let dest = names.reserve(&resource.entry, &stem, ext);
        let detail = entry.transform_kind.describe().to_string();
        let outcome = match fs::rename(&resource.path, tree.root().join(&dest)) {
            Ok(()) => {
                if dest != resource.entry {
                    names.release(&resource.entry);
                }
                TransformOutcome::mapped(resource, &entry, detail)
            }
            Err(e) => {
                warn!("{}: cannot remap to {}: {}", resource.entry, dest, e);
                if dest != resource.entry {
                    names.release(&dest);
                }
                let detail = format!("remap to {} failed: {}", entry.target_name, e);
                TransformOutcome::failed(resource, detail)
            }
        };
        progress(&outcome);
        outcomes.push(Some(outcome));
    }

    let profile = settings.target.sample_profile();
    let results = pcm::run_jobs(&jobs, profile, settings.reencode_threads, cancel)?;

    for ((index, result), (resource, entry)) in results.into_iter().zip(pending) {
        let outcome = match result {
            Ok(done) => {
                let detail = format!(
                    "{}, {} -> {}",
                    entry.transform_kind.describe(),
                    done.source,
                    done.output
                );
                TransformOutcome::mapped(resource, &entry, detail)
            }
            Err(e) => {
                let detail = format!("re-encode to {} failed: {}", entry.target_name, e);
                TransformOutcome::failed(resource, detail)
            }
        };
        progress(&outcome);
        outcomes[index] = Some(outcome);
    }

    Ok(outcomes.into_iter().flatten().collect())
}
