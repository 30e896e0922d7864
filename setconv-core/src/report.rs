use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::classify::ResourceKind;
use crate::mappings::MappingSet;
use crate::models::{OriginModel, TargetModel};
use crate::resolve::{Action, TransformOutcome};

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ConvertStats {
    pub styles_processed: usize,
    pub styles_downgraded: usize,
    pub sounds_processed: usize,
    pub sounds_remapped: usize,
    pub pcms_processed: usize,
    pub pcms_fallbacks: usize,
    pub pcms_failed: usize,
    pub warnings: usize,
}

impl ConvertStats {
    /// Count straight from the outcomes so the summary can never disagree
    /// with the per-resource lines.
    pub fn tally(outcomes: &[TransformOutcome], warnings: usize) -> Self {
        let count = |kind: ResourceKind, pred: fn(&Action) -> bool| {
            outcomes
                .iter()
                .filter(|o| o.resource.kind == kind && pred(&o.action))
                .count()
        };
        let any = |_: &Action| true;
        let mapped = |a: &Action| matches!(a, Action::Mapped(_));
        let failed = |a: &Action| matches!(a, Action::Failed);

        ConvertStats {
            styles_processed: count(ResourceKind::Style, any),
            styles_downgraded: count(ResourceKind::Style, mapped),
            sounds_processed: count(ResourceKind::Sound, any),
            sounds_remapped: count(ResourceKind::Sound, mapped),
            pcms_processed: count(ResourceKind::PcmSample, any),
            pcms_fallbacks: count(ResourceKind::PcmSample, mapped),
            pcms_failed: count(ResourceKind::PcmSample, failed),
            warnings,
        }
    }
}

/// Everything one conversion produced, in classifier listing order.
#[derive(Clone, Debug, Serialize)]
pub struct ConversionRun {
    pub origin: OriginModel,
    pub target: TargetModel,
    pub mapping_version: Option<String>,
    pub outcomes: Vec<TransformOutcome>,
    pub warnings: Vec<String>,
    pub stats: ConvertStats,
    pub elapsed: Duration,
}

impl ConversionRun {
    pub fn finalize(
        origin: OriginModel,
        target: TargetModel,
        mapping: Option<&MappingSet>,
        outcomes: Vec<TransformOutcome>,
        warnings: Vec<String>,
        elapsed: Duration,
    ) -> Self {
        let stats = ConvertStats::tally(&outcomes, warnings.len());
        ConversionRun {
            origin,
            target,
            mapping_version: mapping.map(|m| m.version.clone()),
            outcomes,
            warnings,
            stats,
            elapsed,
        }
    }

    /// Render the report text. Only the final line depends on timing.
    pub fn render(&self) -> String {
        let mut lines = vec![
            "KORG Downgrade Report".to_string(),
            format!("Origin: {} -> Target: {}", self.origin, self.target),
        ];
        match &self.mapping_version {
            Some(version) => {
                lines.push("Mapping present: Yes".to_string());
                lines.push(format!("Mapping version: {version}"));
            }
            None => {
                lines.push("Mapping present: No".to_string());
                lines.push("Mapping version: n/a".to_string());
            }
        }
        lines.push(String::new());

        for kind in ResourceKind::ALL {
            lines.push(match kind {
                ResourceKind::Style => "--- Styles ---".to_string(),
                ResourceKind::Sound => "--- Sounds ---".to_string(),
                ResourceKind::PcmSample => "--- PCM ---".to_string(),
            });
            for outcome in self.outcomes.iter().filter(|o| o.resource.kind == *kind) {
                lines.push(outcome_line(outcome));
            }
        }

        if !self.warnings.is_empty() {
            lines.push("--- Warnings ---".to_string());
            for warning in &self.warnings {
                lines.push(format!("WARN: {warning}"));
            }
        }

        let s = &self.stats;
        lines.push(String::new());
        lines.push("Summary:".to_string());
        lines.push(format!(
            "Styles processed: {}, downgraded: {}",
            s.styles_processed, s.styles_downgraded
        ));
        lines.push(format!(
            "Sounds processed: {}, remapped: {}",
            s.sounds_processed, s.sounds_remapped
        ));
        lines.push(format!(
            "PCMs processed: {}, fallbacks: {}, failed: {}",
            s.pcms_processed, s.pcms_fallbacks, s.pcms_failed
        ));
        lines.push(format!("Warnings: {}", s.warnings));
        lines.push(format!(
            "Processing time (sec): {:.3}",
            self.elapsed.as_secs_f64()
        ));

        lines.join("\n")
    }
}

fn outcome_line(outcome: &TransformOutcome) -> String {
    let label = outcome.resource.kind.label();
    let name = &outcome.resource.canonical_name;
    match outcome.action {
        Action::Mapped(_) if outcome.resource.kind == ResourceKind::PcmSample => format!(
            "{label}: {name} -> fallback {} [{}]",
            outcome.result_name, outcome.detail
        ),
        Action::Mapped(_) => format!(
            "{label}: {name} -> {} [{}]",
            outcome.result_name, outcome.detail
        ),
        Action::KeptUnchanged => format!("{label}: {name} -> (no mapping) KEEP {name}"),
        Action::Failed => format!("{label}: {name} -> FAILED ({})", outcome.detail),
    }
}

/// Handed back to the caller once the archive exists.
#[derive(Clone, Debug, Serialize)]
pub struct ConvertResult {
    pub output_archive_path: PathBuf,
    pub report: String,
    pub stats: ConvertStats,
    pub outcomes: Vec<TransformOutcome>,
}
