//! Coarse activation status and result codes shared by every entity kind.

use serde::Serialize;
use strum::{Display, EnumString, IntoStaticStr};

/// Activation status reported to the dependency graph.
///
/// Each entity kind maps its own fine-grained states onto this enum through
/// a static table; the dependency graph only ever sees these values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActiveState {
    /// Not active and not failed.
    Inactive,
    /// Working through activation stages.
    Activating,
    /// Fully active.
    Active,
    /// Stopped uncleanly; needs a start or a reset to leave.
    Failed,
}

/// Outcome recorded by an entity for its most recent activation.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, EnumString, Display, IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ActivationResult {
    /// Nothing went wrong.
    #[default]
    Success,
    /// A kernel resource could not be allocated, opened, or submitted.
    Resources,
    /// A required collaborator entity was missing.
    Dependency,
    /// The dependent service exhausted its own restart budget.
    ServiceFailedPermanent,
}

impl ActivationResult {
    /// Returns `true` for [`ActivationResult::Success`].
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// Stable name used in dumps and serialized state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Folds a newly reported outcome into the stored one.
    ///
    /// Success never overwrites a stored failure; any failure overwrites
    /// whatever was stored, so the most recent failure is retained.
    // TODO: keep the first failure of an activation alongside the latest so
    // dumps can point at the root cause rather than the last symptom.
    pub fn record(&mut self, outcome: Self) {
        if !outcome.is_success() {
            *self = outcome;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(ActivationResult::Success, "success")]
    #[case(ActivationResult::Resources, "resources")]
    #[case(ActivationResult::Dependency, "dependency")]
    #[case(ActivationResult::ServiceFailedPermanent, "service-failed-permanent")]
    fn result_names_form_a_bijection(#[case] result: ActivationResult, #[case] name: &str) {
        assert_eq!(result.as_str(), name);
        assert_eq!(ActivationResult::from_str(name).ok(), Some(result));
    }

    #[rstest]
    fn success_does_not_overwrite_failure() {
        let mut result = ActivationResult::Resources;
        result.record(ActivationResult::Success);
        assert_eq!(result, ActivationResult::Resources);
    }

    #[rstest]
    fn latest_failure_wins() {
        let mut result = ActivationResult::Resources;
        result.record(ActivationResult::ServiceFailedPermanent);
        assert_eq!(result, ActivationResult::ServiceFailedPermanent);
    }
}
