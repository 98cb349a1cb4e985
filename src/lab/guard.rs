//! Booking state machines and the guards every status change goes through.
//!
//! Reservation: `pending → {approved, rejected, cancelled}`, `approved → {cancelled, done}`.
//! Loan: `pending → {approved, rejected}`, `approved → {returned}`.
//! Nothing re-enters `pending`.

use ulid::Ulid;

use crate::model::{Actor, LoanStatus, ReservationStatus};
use crate::store::StoreError;

use super::error::{Entity, LabError};

/// Status type of one booking kind.
pub(crate) trait BookingStatus: Copy + PartialEq + 'static {
    const ENTITY: Entity;

    fn as_str(self) -> &'static str;
    fn can_become(self, to: Self) -> bool;
}

impl BookingStatus for ReservationStatus {
    const ENTITY: Entity = Entity::Reservation;

    fn as_str(self) -> &'static str {
        ReservationStatus::as_str(self)
    }

    fn can_become(self, to: Self) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, to),
            (Pending, Approved | Rejected | Cancelled) | (Approved, Cancelled | Done)
        )
    }
}

impl BookingStatus for LoanStatus {
    const ENTITY: Entity = Entity::LoanRequest;

    fn as_str(self) -> &'static str {
        LoanStatus::as_str(self)
    }

    fn can_become(self, to: Self) -> bool {
        use LoanStatus::*;
        matches!((self, to), (Pending, Approved | Rejected) | (Approved, Returned))
    }
}

/// Who may trigger a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Authority {
    Teacher,
    /// A teacher, or the actor who created the booking.
    TeacherOrRequester,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Transition<S: 'static> {
    pub op: &'static str,
    pub from: &'static [S],
    pub to: S,
    pub authority: Authority,
}

pub(crate) mod reservation {
    use super::*;
    use crate::lab::ops;
    use crate::model::ReservationStatus::*;

    pub(crate) const APPROVE: Transition<ReservationStatus> = Transition {
        op: ops::APPROVE_RESERVATION,
        from: &[Pending],
        to: Approved,
        authority: Authority::Teacher,
    };
    pub(crate) const REJECT: Transition<ReservationStatus> = Transition {
        op: ops::REJECT_RESERVATION,
        from: &[Pending],
        to: Rejected,
        authority: Authority::Teacher,
    };
    pub(crate) const CANCEL: Transition<ReservationStatus> = Transition {
        op: ops::CANCEL_RESERVATION,
        from: &[Pending, Approved],
        to: Cancelled,
        authority: Authority::TeacherOrRequester,
    };
    pub(crate) const MARK_DONE: Transition<ReservationStatus> = Transition {
        op: ops::MARK_RESERVATION_DONE,
        from: &[Approved],
        to: Done,
        authority: Authority::Teacher,
    };
}

pub(crate) mod loan {
    use super::*;
    use crate::lab::ops;
    use crate::model::LoanStatus::*;

    pub(crate) const APPROVE: Transition<LoanStatus> = Transition {
        op: ops::APPROVE_LOAN,
        from: &[Pending],
        to: Approved,
        authority: Authority::Teacher,
    };
    pub(crate) const REJECT: Transition<LoanStatus> = Transition {
        op: ops::REJECT_LOAN,
        from: &[Pending],
        to: Rejected,
        authority: Authority::Teacher,
    };
    pub(crate) const RETURN: Transition<LoanStatus> = Transition {
        op: ops::RETURN_LOAN,
        from: &[Approved],
        to: Returned,
        authority: Authority::Teacher,
    };
}

impl<S: BookingStatus> Transition<S> {
    /// Role check that needs no store access.
    pub fn check_role(&self, actor: &Actor) -> Result<(), LabError> {
        match self.authority {
            Authority::Teacher if !actor.is_teacher() => {
                Err(LabError::Forbidden { actor: actor.id, action: self.op })
            }
            _ => Ok(()),
        }
    }

    /// Ownership check once the booking is loaded.
    pub fn check_owner(&self, actor: &Actor, requester: Ulid) -> Result<(), LabError> {
        match self.authority {
            Authority::TeacherOrRequester if !actor.is_teacher() && actor.id != requester => {
                Err(LabError::Forbidden { actor: actor.id, action: self.op })
            }
            _ => Ok(()),
        }
    }

    /// Source-status precondition.
    pub fn check_source(&self, id: Ulid, current: S) -> Result<(), LabError> {
        if self.from.contains(&current) {
            Ok(())
        } else {
            Err(self.invalid(id, current.as_str()))
        }
    }

    /// Deciding actor to stamp: a self-cancel by the requester records none.
    pub fn decider(&self, actor: &Actor) -> Option<Ulid> {
        match self.authority {
            Authority::TeacherOrRequester if !actor.is_teacher() => None,
            _ => Some(actor.id),
        }
    }

    /// Map a store error from the compare-and-set write.
    pub fn map_store_error(&self, id: Ulid, err: StoreError) -> LabError {
        match err {
            StoreError::StatusMismatch { current, .. } => self.invalid(id, current),
            StoreError::NotFound(missing) if missing == id => LabError::not_found(S::ENTITY, id),
            other => LabError::Store(other),
        }
    }

    fn invalid(&self, id: Ulid, from: &'static str) -> LabError {
        LabError::InvalidTransition {
            entity: S::ENTITY,
            id,
            from,
            to: self.to.as_str(),
        }
    }
}
