//! Detection of configuration drift between desired and deployed containers.
//!
//! The reconciler asks a [`DriftComparator`] whether an existing container
//! still matches its desired [`CreateRequest`]; a detected drift causes the
//! container to be recreated.

use std::collections::BTreeSet;

use convoy_common::types::DriftField;

use crate::backend::{CreateRequest, InspectInfo, normalize_port};

/// Result of comparing a desired container with the deployed one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drift {
    /// The deployed container matches.
    None,
    /// The deployed container differs, with a human-readable reason.
    Detected(String),
}

impl Drift {
    /// Returns `true` if drift was detected.
    #[must_use]
    pub const fn is_drifted(&self) -> bool {
        matches!(self, Self::Detected(_))
    }
}

/// Decides whether a deployed container must be recreated.
pub trait DriftComparator: Send + Sync {
    /// Compares the desired request with the observed container.
    fn compare(&self, desired: &CreateRequest, observed: &InspectInfo) -> Drift;
}

/// Compares the image reference only.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageComparator;

impl DriftComparator for ImageComparator {
    fn compare(&self, desired: &CreateRequest, observed: &InspectInfo) -> Drift {
        if desired.image == observed.image {
            Drift::None
        } else {
            Drift::Detected(format!(
                "image changed from {} to {}",
                observed.image, desired.image
            ))
        }
    }
}

/// Compares a configurable set of fields.
///
/// Fields the backend did not report are skipped. Environment and exposed
/// ports are compared as subsets because the deployed container also
/// carries the image's own values; volumes and links must match exactly.
#[derive(Debug, Clone)]
pub struct StructuredComparator {
    fields: BTreeSet<DriftField>,
}

impl StructuredComparator {
    /// Compares the given fields.
    #[must_use]
    pub fn new(fields: impl IntoIterator<Item = DriftField>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    /// Compares every field.
    #[must_use]
    pub fn all() -> Self {
        Self::new(DriftField::ALL)
    }

    fn compare_field(field: DriftField, desired: &CreateRequest, observed: &InspectInfo) -> Option<String> {
        match field {
            DriftField::Image => match ImageComparator.compare(desired, observed) {
                Drift::Detected(reason) => Some(reason),
                Drift::None => None,
            },
            DriftField::Env => {
                let observed = observed.env.as_ref()?;
                let changed: Vec<&str> = desired
                    .env
                    .iter()
                    .filter(|&(key, value)| observed.get(key) != Some(value))
                    .map(|(key, _)| key.as_str())
                    .collect();
                (!changed.is_empty()).then(|| format!("environment changed: {}", changed.join(", ")))
            }
            DriftField::Ports => {
                let observed = observed.exposed_ports.as_ref()?;
                let missing: Vec<String> = desired
                    .exposed_ports
                    .iter()
                    .map(|p| normalize_port(p))
                    .filter(|p| !observed.contains(p))
                    .collect();
                (!missing.is_empty()).then(|| format!("ports not exposed: {}", missing.join(", ")))
            }
            DriftField::Volumes => {
                let observed = observed.volumes.as_ref()?;
                let desired: BTreeSet<String> = desired.volumes.iter().cloned().collect();
                (&desired != observed).then(|| "volumes changed".to_string())
            }
            DriftField::Links => {
                let observed = observed.links.as_ref()?;
                (&desired.link_specs() != observed).then(|| "links changed".to_string())
            }
        }
    }
}

impl Default for StructuredComparator {
    fn default() -> Self {
        Self::new([DriftField::Image])
    }
}

impl DriftComparator for StructuredComparator {
    fn compare(&self, desired: &CreateRequest, observed: &InspectInfo) -> Drift {
        let reasons: Vec<String> = self
            .fields
            .iter()
            .filter_map(|&field| Self::compare_field(field, desired, observed))
            .collect();
        if reasons.is_empty() {
            Drift::None
        } else {
            Drift::Detected(reasons.join("; "))
        }
    }
}
