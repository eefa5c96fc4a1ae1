//! Dual-status transition validation.
//!
//! [`StatusTransitionValidator::validate`] decides whether a proposed change to
//! one or both fields of a [`DualStatus`] is legal given the committed status.
//! Rules are evaluated in a fixed order and the first one that matches decides
//! the error:
//!
//! 1. proposing `sold` while the item is, or would be, `in_repair`
//! 2. changing the physical status of a `sold` item
//! 3. pairing `in_repair` with a current or proposed `reserved`
//! 4. undeclared enum values
//! 5. a proposal that changes nothing
//!
//! Validation is pure and can be called speculatively.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::status::{BusinessStatus, DualStatus, PhysicalStatus, StatusPatch};

/// A forbidden (physical, business) pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionViolation {
    /// `sold` proposed while the item is in repair.
    SoldWhileInRepair,
    /// Physical status change requested on a sold item.
    SoldPhysicalLocked,
    /// `in_repair` paired with `reserved`.
    ReservedInRepair,
}

impl TransitionViolation {
    /// The user-facing message for this violation.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::SoldWhileInRepair => "Cannot mark items as sold while they are in repair.",
            Self::SoldPhysicalLocked => "Cannot change physical status of sold items.",
            Self::ReservedInRepair => "Reserved items should not be in repair status.",
        }
    }
}

impl fmt::Display for TransitionViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Rejection returned by [`StatusTransitionValidator::validate`].
///
/// `error()` and `details()` are part of the caller contract and are surfaced
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// The proposal would produce a forbidden pairing.
    #[error("Invalid status transition: {0}")]
    Forbidden(TransitionViolation),

    /// Proposed physical status is not a declared value.
    #[error("Invalid physical_status '{value}'. Must be one of: {}", allowed_list(&PhysicalStatus::ALL))]
    InvalidPhysicalStatus {
        /// The rejected value.
        value: String,
    },

    /// Proposed business status is not a declared value.
    #[error("Invalid business_status '{value}'. Must be one of: {}", allowed_list(&BusinessStatus::ALL))]
    InvalidBusinessStatus {
        /// The rejected value.
        value: String,
    },

    /// The proposal changes nothing.
    #[error("No status change: proposed status matches the current status")]
    NoChange,
}

impl TransitionError {
    /// Short error label.
    #[must_use]
    pub const fn error(&self) -> &'static str {
        match self {
            Self::Forbidden(_) => "Invalid status transition",
            Self::InvalidPhysicalStatus { .. } => "Invalid physical_status",
            Self::InvalidBusinessStatus { .. } => "Invalid business_status",
            Self::NoChange => "No status change",
        }
    }

    /// Detail message.
    #[must_use]
    pub fn details(&self) -> String {
        match self {
            Self::Forbidden(v) => v.message().to_string(),
            Self::InvalidPhysicalStatus { value } => format!(
                "'{value}' is not allowed. Allowed values: {}",
                allowed_list(&PhysicalStatus::ALL)
            ),
            Self::InvalidBusinessStatus { value } => format!(
                "'{value}' is not allowed. Allowed values: {}",
                allowed_list(&BusinessStatus::ALL)
            ),
            Self::NoChange => "Proposed status matches the current status.".to_string(),
        }
    }

    /// True for the no-op rejection, which is not a transition violation.
    #[must_use]
    pub const fn is_no_op(&self) -> bool {
        matches!(self, Self::NoChange)
    }

    /// The violated rule, if this is a forbidden transition.
    #[must_use]
    pub const fn violation(&self) -> Option<TransitionViolation> {
        match self {
            Self::Forbidden(v) => Some(*v),
            _ => None,
        }
    }

    /// Serializable `{error, details}` body.
    #[must_use]
    pub fn to_rejection(&self) -> TransitionRejection {
        TransitionRejection {
            error: self.error().to_string(),
            details: self.details(),
        }
    }
}

/// Wire form of a [`TransitionError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionRejection {
    /// Short error label.
    pub error: String,
    /// Detail message.
    pub details: String,
}

fn allowed_list<T: fmt::Display>(values: &[T]) -> String {
    values.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// A proposal that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTransition {
    /// Current status with the proposal applied. Update stamps are carried
    /// over from the current status unchanged.
    pub merged: DualStatus,
    /// True if the physical status moved.
    pub physical_status_changed: bool,
    /// True if the business status moved.
    pub business_status_changed: bool,
}

/// Values each dimension could individually move to from a given status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedTargets {
    /// Reachable physical statuses.
    pub physical: Vec<PhysicalStatus>,
    /// Reachable business statuses.
    pub business: Vec<BusinessStatus>,
}

/// A proposed field: absent, a declared value, or an undeclared raw string.
#[derive(Debug, Clone, Copy)]
enum Candidate<'a, T> {
    Absent,
    Valid(T),
    Invalid(&'a str),
}

impl<'a, T: Copy + std::str::FromStr> Candidate<'a, T> {
    fn parse(raw: Option<&'a str>) -> Self {
        match raw {
            None => Self::Absent,
            Some(s) => s.parse().map_or(Self::Invalid(s), Self::Valid),
        }
    }

    fn valid(self) -> Option<T> {
        match self {
            Self::Valid(v) => Some(v),
            _ => None,
        }
    }

    /// The value the field would hold after the proposal. An undeclared value
    /// matches nothing.
    fn effective(self, current: T) -> Option<T> {
        match self {
            Self::Absent => Some(current),
            Self::Valid(v) => Some(v),
            Self::Invalid(_) => None,
        }
    }
}

/// Pure validator for dual-status transitions.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusTransitionValidator;

impl StatusTransitionValidator {
    /// Validates `proposed` against the committed `current` status.
    ///
    /// # Errors
    /// Returns the first matching [`TransitionError`] in rule order.
    pub fn validate(
        current: &DualStatus,
        proposed: &StatusPatch,
    ) -> Result<ValidatedTransition, TransitionError> {
        let physical = Candidate::<PhysicalStatus>::parse(proposed.physical_status.as_deref());
        let business = Candidate::<BusinessStatus>::parse(proposed.business_status.as_deref());

        let next_physical = physical.effective(current.physical_status);
        let next_business = business.effective(current.business_status);

        let in_repair = current.physical_status == PhysicalStatus::InRepair
            || next_physical == Some(PhysicalStatus::InRepair);
        if business.valid() == Some(BusinessStatus::Sold) && in_repair {
            return Err(TransitionError::Forbidden(TransitionViolation::SoldWhileInRepair));
        }

        if current.business_status == BusinessStatus::Sold
            && proposed
                .physical_status
                .as_deref()
                .is_some_and(|raw| raw != current.physical_status.as_str())
        {
            return Err(TransitionError::Forbidden(TransitionViolation::SoldPhysicalLocked));
        }

        let repair_proposed = physical.valid() == Some(PhysicalStatus::InRepair)
            && (current.business_status == BusinessStatus::Reserved
                || next_business == Some(BusinessStatus::Reserved));
        let reserve_proposed = business.valid() == Some(BusinessStatus::Reserved)
            && next_physical == Some(PhysicalStatus::InRepair);
        if repair_proposed || reserve_proposed {
            return Err(TransitionError::Forbidden(TransitionViolation::ReservedInRepair));
        }

        if let Candidate::Invalid(value) = physical {
            return Err(TransitionError::InvalidPhysicalStatus {
                value: value.to_string(),
            });
        }
        if let Candidate::Invalid(value) = business {
            return Err(TransitionError::InvalidBusinessStatus {
                value: value.to_string(),
            });
        }

        let mut merged = current.clone();
        if let Candidate::Valid(v) = physical {
            merged.physical_status = v;
        }
        if let Candidate::Valid(v) = business {
            merged.business_status = v;
        }

        let physical_status_changed = merged.physical_status != current.physical_status;
        let business_status_changed = merged.business_status != current.business_status;
        if !physical_status_changed && !business_status_changed {
            return Err(TransitionError::NoChange);
        }

        Ok(ValidatedTransition {
            merged,
            physical_status_changed,
            business_status_changed,
        })
    }

    /// Lists the values each field could be moved to on its own, for UI
    /// pre-validation. The current value is never listed.
    #[must_use]
    pub fn allowed_targets(current: &DualStatus) -> AllowedTargets {
        let physical = PhysicalStatus::ALL
            .into_iter()
            .filter(|v| Self::validate(current, &StatusPatch::new().physical(v.as_str())).is_ok())
            .collect();
        let business = BusinessStatus::ALL
            .into_iter()
            .filter(|v| Self::validate(current, &StatusPatch::new().business(v.as_str())).is_ok())
            .collect();
        AllowedTargets { physical, business }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_states() -> Vec<DualStatus> {
        let mut out = Vec::new();
        for p in PhysicalStatus::ALL {
            for b in BusinessStatus::ALL {
                out.push(DualStatus::new(p, b));
            }
        }
        out
    }

    fn all_patches() -> Vec<StatusPatch> {
        let mut physical: Vec<Option<&str>> = vec![None, Some("warehouse")];
        physical.extend(PhysicalStatus::ALL.iter().map(|v| Some(v.as_str())));
        let mut business: Vec<Option<&str>> = vec![None, Some("gifted")];
        business.extend(BusinessStatus::ALL.iter().map(|v| Some(v.as_str())));

        let mut out = Vec::new();
        for p in &physical {
            for b in &business {
                out.push(StatusPatch {
                    physical_status: p.map(str::to_string),
                    business_status: b.map(str::to_string),
                });
            }
        }
        out
    }

    #[test]
    fn empty_proposal_is_always_no_op() {
        for current in all_states() {
            let err = StatusTransitionValidator::validate(&current, &StatusPatch::new()).unwrap_err();
            assert!(err.is_no_op(), "{current}: {err:?}");
        }
    }

    #[test]
    fn sold_items_cannot_change_physical_status() {
        for p in PhysicalStatus::ALL {
            let current = DualStatus::new(p, BusinessStatus::Sold);
            for target in PhysicalStatus::ALL.into_iter().filter(|t| *t != p) {
                let err = StatusTransitionValidator::validate(
                    &current,
                    &StatusPatch::new().physical(target.as_str()),
                )
                .unwrap_err();
                assert_eq!(err.violation(), Some(TransitionViolation::SoldPhysicalLocked));
            }
        }
    }

    #[test]
    fn in_repair_items_cannot_be_sold() {
        for b in BusinessStatus::ALL {
            let current = DualStatus::new(PhysicalStatus::InRepair, b);
            let err =
                StatusTransitionValidator::validate(&current, &StatusPatch::new().business("sold"))
                    .unwrap_err();
            assert_eq!(err.error(), "Invalid status transition");
            assert_eq!(err.details(), "Cannot mark items as sold while they are in repair.");
        }
    }

    #[test]
    fn repair_and_reserved_never_pair() {
        for current in all_states() {
            // in_repair proposed, reserved from current or candidate.
            let mut patches = vec![StatusPatch::new().physical("in_repair").business("reserved")];
            if current.business_status == BusinessStatus::Reserved {
                patches.push(StatusPatch::new().physical("in_repair"));
            }
            for patch in patches {
                let err = StatusTransitionValidator::validate(&current, &patch).unwrap_err();
                if current.business_status == BusinessStatus::Sold
                    && current.physical_status != PhysicalStatus::InRepair
                {
                    // Locked sold items hit the earlier rule.
                    assert_eq!(err.violation(), Some(TransitionViolation::SoldPhysicalLocked));
                } else {
                    assert_eq!(
                        err.details(),
                        "Reserved items should not be in repair status.",
                        "{current} + {patch:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn selling_while_leaving_repair_is_still_rejected() {
        for b in BusinessStatus::ALL {
            let current = DualStatus::new(PhysicalStatus::InRepair, b);
            for target in [PhysicalStatus::Depot, PhysicalStatus::InTransit] {
                let patch = StatusPatch::new().physical(target.as_str()).business("sold");
                let err = StatusTransitionValidator::validate(&current, &patch).unwrap_err();
                assert_eq!(err.violation(), Some(TransitionViolation::SoldWhileInRepair), "{current}");
            }
        }
    }

    #[test]
    fn repairing_a_reserved_item_is_rejected_even_when_releasing_it() {
        for p in [PhysicalStatus::Depot, PhysicalStatus::InTransit] {
            let current = DualStatus::new(p, BusinessStatus::Reserved);
            for b in [BusinessStatus::Available, BusinessStatus::Sold] {
                let patch = StatusPatch::new().physical("in_repair").business(b.as_str());
                let err = StatusTransitionValidator::validate(&current, &patch).unwrap_err();
                let expected = if b == BusinessStatus::Sold {
                    TransitionViolation::SoldWhileInRepair
                } else {
                    TransitionViolation::ReservedInRepair
                };
                assert_eq!(err.violation(), Some(expected), "{current} + {patch:?}");
            }
        }
    }

    #[test]
    fn reserving_an_item_in_repair_is_rejected() {
        let current = DualStatus::new(PhysicalStatus::InRepair, BusinessStatus::Available);
        let err =
            StatusTransitionValidator::validate(&current, &StatusPatch::new().business("reserved"))
                .unwrap_err();
        assert_eq!(err.violation(), Some(TransitionViolation::ReservedInRepair));
    }

    #[test]
    fn merged_result_is_a_fixed_point() {
        for current in all_states() {
            for patch in all_patches() {
                if let Ok(ok) = StatusTransitionValidator::validate(&current, &patch) {
                    let again =
                        StatusTransitionValidator::validate(&ok.merged, &StatusPatch::new()).unwrap_err();
                    assert!(again.is_no_op());
                }
            }
        }
    }

    #[test]
    fn successful_transitions_never_produce_forbidden_pairs() {
        for current in all_states() {
            for patch in all_patches() {
                if let Ok(ok) = StatusTransitionValidator::validate(&current, &patch) {
                    let pair = (ok.merged.physical_status, ok.merged.business_status);
                    assert_ne!(pair, (PhysicalStatus::InRepair, BusinessStatus::Sold));
                    assert_ne!(pair, (PhysicalStatus::InRepair, BusinessStatus::Reserved));
                }
            }
        }
    }

    #[test]
    fn depot_to_in_transit_changes_physical_only() {
        let current = DualStatus::new(PhysicalStatus::Depot, BusinessStatus::Available);
        let ok = StatusTransitionValidator::validate(&current, &StatusPatch::new().physical("in_transit"))
            .unwrap();
        assert!(ok.physical_status_changed);
        assert!(!ok.business_status_changed);
        assert_eq!(ok.merged.physical_status, PhysicalStatus::InTransit);
        assert_eq!(ok.merged.business_status, BusinessStatus::Available);
    }

    #[test]
    fn sold_depot_item_cannot_move() {
        let current = DualStatus::new(PhysicalStatus::Depot, BusinessStatus::Sold);
        let err = StatusTransitionValidator::validate(&current, &StatusPatch::new().physical("in_transit"))
            .unwrap_err();
        assert_eq!(err.details(), "Cannot change physical status of sold items.");
    }

    #[test]
    fn undeclared_values_enumerate_allowed_values() {
        let current = DualStatus::new(PhysicalStatus::Depot, BusinessStatus::Available);

        let err = StatusTransitionValidator::validate(&current, &StatusPatch::new().physical("lost"))
            .unwrap_err();
        assert_eq!(err.error(), "Invalid physical_status");
        assert!(err.details().contains("depot, in_repair, in_transit"));

        let err = StatusTransitionValidator::validate(&current, &StatusPatch::new().business("gifted"))
            .unwrap_err();
        assert_eq!(err.error(), "Invalid business_status");
        assert!(err.details().contains("available, reserved, sold"));
    }

    #[test]
    fn rule_order_prefers_transition_violation_over_enum_error() {
        let current = DualStatus::new(PhysicalStatus::InRepair, BusinessStatus::Available);
        let patch = StatusPatch::new().business("sold");
        let err = StatusTransitionValidator::validate(&current, &patch.physical("in_repair")).unwrap_err();
        assert_eq!(err.violation(), Some(TransitionViolation::SoldWhileInRepair));

        // An undeclared physical value on a sold item is still a physical change.
        let sold = DualStatus::new(PhysicalStatus::Depot, BusinessStatus::Sold);
        let err = StatusTransitionValidator::validate(&sold, &StatusPatch::new().physical("lost"))
            .unwrap_err();
        assert_eq!(err.violation(), Some(TransitionViolation::SoldPhysicalLocked));
    }

    #[test]
    fn restating_current_values_is_no_op() {
        let current = DualStatus::new(PhysicalStatus::InTransit, BusinessStatus::Reserved);
        let err = StatusTransitionValidator::validate(
            &current,
            &StatusPatch::new().physical("in_transit").business("reserved"),
        )
        .unwrap_err();
        assert_eq!(err, TransitionError::NoChange);
    }

    #[test]
    fn rejection_body_carries_error_and_details() {
        let body = TransitionError::Forbidden(TransitionViolation::SoldPhysicalLocked).to_rejection();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"], "Invalid status transition");
        assert_eq!(json["details"], "Cannot change physical status of sold items.");
    }

    #[test]
    fn allowed_targets_for_reserved_depot_item() {
        let current = DualStatus::new(PhysicalStatus::Depot, BusinessStatus::Reserved);
        let targets = StatusTransitionValidator::allowed_targets(&current);
        assert_eq!(targets.physical, vec![PhysicalStatus::InTransit]);
        assert_eq!(targets.business, vec![BusinessStatus::Available, BusinessStatus::Sold]);
    }

    #[test]
    fn allowed_targets_for_sold_item_lock_physical() {
        let current = DualStatus::new(PhysicalStatus::InTransit, BusinessStatus::Sold);
        let targets = StatusTransitionValidator::allowed_targets(&current);
        assert!(targets.physical.is_empty());
        assert_eq!(targets.business, vec![BusinessStatus::Available, BusinessStatus::Reserved]);
    }
}
