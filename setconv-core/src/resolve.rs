use serde::Serialize;
use tracing::debug;

use crate::classify::{ResourceDescriptor, ResourceKind};
use crate::mappings::{MappingEntry, MappingSet, TransformKind};
use crate::{CancelToken, Result};

/// What the resolver decided for one resource, before anything touches the
/// working tree.
#[derive(Clone, Debug)]
pub enum Decision {
    Map(MappingEntry),
    Keep,
}

#[derive(Clone, Debug)]
pub struct Resolution {
    pub resource: ResourceDescriptor,
    pub decision: Decision,
}

impl Resolution {
    /// Mapped samples are always re-encoded, even when the target name is
    /// already native to the target model.
    pub fn needs_reencode(&self) -> bool {
        self.resource.kind == ResourceKind::PcmSample && matches!(self.decision, Decision::Map(_))
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "action", content = "transform", rename_all = "snake_case")]
pub enum Action {
    Mapped(TransformKind),
    KeptUnchanged,
    Failed,
}

/// Final result for one resource. Exactly one exists per classified
/// resource.
#[derive(Clone, Debug, Serialize)]
pub struct TransformOutcome {
    pub resource: ResourceDescriptor,
    pub action: Action,
    pub result_name: String,
    pub detail: String,
}

impl TransformOutcome {
    pub fn mapped(resource: ResourceDescriptor, entry: &MappingEntry, detail: String) -> Self {
        TransformOutcome {
            resource,
            action: Action::Mapped(entry.transform_kind),
            result_name: entry.target_name.clone(),
            detail,
        }
    }

    pub fn kept(resource: ResourceDescriptor) -> Self {
        let result_name = resource.canonical_name.clone();
        TransformOutcome {
            resource,
            action: Action::KeptUnchanged,
            result_name,
            detail: "no mapping".to_string(),
        }
    }

    /// The resource stays verbatim under its own name.
    pub fn failed(resource: ResourceDescriptor, detail: String) -> Self {
        let result_name = resource.canonical_name.clone();
        TransformOutcome {
            resource,
            action: Action::Failed,
            result_name,
            detail,
        }
    }
}

/// Decide every resource against `mapping`, in listing order.
///
/// A missing set or a missing entry keeps the resource unchanged.
pub fn resolve(
    resources: Vec<ResourceDescriptor>,
    mapping: Option<&MappingSet>,
    cancel: &CancelToken,
) -> Result<Vec<Resolution>> {
    let mut resolutions = Vec::with_capacity(resources.len());

    for resource in resources {
        cancel.check()?;

        let decision = match mapping.and_then(|m| m.lookup(resource.kind, &resource.canonical_name)) {
            Some(entry) => {
                debug!(
                    "{}: {} -> {} ({})",
                    resource.kind,
                    resource.canonical_name,
                    entry.target_name,
                    entry.transform_kind.describe()
                );
                Decision::Map(entry.clone())
            }
            None => {
                debug!("{}: {} has no mapping, kept", resource.kind, resource.canonical_name);
                Decision::Keep
            }
        };

        resolutions.push(Resolution { resource, decision });
    }

    Ok(resolutions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mappings::MappingRepository;
    use crate::models::{OriginModel, TargetModel};
    use crate::ConverterError;
    use std::path::PathBuf;

    fn descriptor(kind: ResourceKind, name: &str) -> ResourceDescriptor {
        ResourceDescriptor {
            kind,
            canonical_name: name.to_string(),
            entry: name.to_string(),
            path: PathBuf::from(name),
        }
    }

    #[test]
    fn maps_found_names_and_keeps_the_rest() {
        let set = MappingRepository::builtin()
            .lookup(OriginModel::Pa4x, TargetModel::Pa3x)
            .unwrap();
        let resources = vec![
            descriptor(ResourceKind::Sound, "Grand Piano 4K"),
            descriptor(ResourceKind::Sound, "Nylon Guitar"),
            descriptor(ResourceKind::PcmSample, "StudioStringsHQ"),
        ];

        let resolutions = resolve(resources, Some(set), &CancelToken::new()).unwrap();

        assert_eq!(resolutions.len(), 3);
        match &resolutions[0].decision {
            Decision::Map(entry) => assert_eq!(entry.target_name, "Grand Piano 3"),
            Decision::Keep => panic!("expected a mapping"),
        }
        assert!(matches!(resolutions[1].decision, Decision::Keep));
        assert!(!resolutions[0].needs_reencode());
        assert!(resolutions[2].needs_reencode());
    }

    #[test]
    fn missing_set_keeps_everything() {
        let resources = vec![
            descriptor(ResourceKind::Style, "POP Modern Ballad"),
            descriptor(ResourceKind::PcmSample, "StudioStringsHQ"),
        ];
        let resolutions = resolve(resources, None, &CancelToken::new()).unwrap();
        assert!(resolutions.iter().all(|r| matches!(r.decision, Decision::Keep)));
        assert!(resolutions.iter().all(|r| !r.needs_reencode()));
    }

    #[test]
    fn kept_outcome_is_identity() {
        let outcome = TransformOutcome::kept(descriptor(ResourceKind::Style, "Jazz Trio"));
        assert_eq!(outcome.action, Action::KeptUnchanged);
        assert_eq!(outcome.result_name, "Jazz Trio");
    }

    #[test]
    fn cancelled_token_stops_resolution() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = resolve(
            vec![descriptor(ResourceKind::Style, "A")],
            None,
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, ConverterError::Cancelled));
    }
}
