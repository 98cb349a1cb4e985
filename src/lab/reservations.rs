//! Time-interval allocator.

use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::notify::Subject;
use crate::store::StoreError;

use super::error::{Conflict, Entity, LabError};
use super::guard::{self, Transition};
use super::{Lab, ops, require_student};

impl Lab {
    /// Book `[start_at, end_at)` on a resource. The booking starts `pending`
    /// when the resource requires approval, `approved` otherwise.
    pub async fn create_reservation(
        &self,
        resource_id: Ulid,
        start_at: Ms,
        end_at: Ms,
        actor: &Actor,
    ) -> Result<Ulid, LabError> {
        self.observed(ops::CREATE_RESERVATION, async {
            require_student(actor, ops::CREATE_RESERVATION)?;
            let span = self.hours.validate(start_at, end_at)?;

            let resource = self
                .store
                .resource(resource_id)
                .await?
                .ok_or_else(|| LabError::not_found(Entity::Resource, resource_id))?;

            if let Some(with) = self.first_overlap(resource_id, span, None).await? {
                return Err(Conflict::Overlap { resource_id, with }.into());
            }

            let status = if resource.details.requires_approval {
                ReservationStatus::Pending
            } else {
                ReservationStatus::Approved
            };
            let reservation = Reservation {
                id: Ulid::new(),
                resource_id,
                requester: actor.id,
                span,
                status,
                decided_by: None,
                decided_at: None,
                created_at: now_ms(),
            };
            let id = reservation.id;

            // The store re-checks overlap under its own lock.
            self.store
                .insert_reservation(reservation)
                .await
                .map_err(|e| match e {
                    StoreError::ExclusionViolation { with } => {
                        Conflict::Overlap { resource_id, with }.into()
                    }
                    StoreError::NotFound(_) => LabError::not_found(Entity::Resource, resource_id),
                    other => LabError::Store(other),
                })?;

            info!(reservation_id = %id, %resource_id, requester = %actor.id, %status, "reservation created");
            self.refresh(Subject::Resource(resource_id), ops::CREATE_RESERVATION);
            Ok(id)
        })
        .await
    }

    /// Approve a pending reservation after re-running the overlap check
    /// against current state.
    pub async fn approve_reservation(&self, id: Ulid, actor: &Actor) -> Result<Reservation, LabError> {
        self.observed(ops::APPROVE_RESERVATION, self.decide_reservation(&guard::reservation::APPROVE, id, actor))
            .await
    }

    pub async fn reject_reservation(&self, id: Ulid, actor: &Actor) -> Result<Reservation, LabError> {
        self.observed(ops::REJECT_RESERVATION, self.decide_reservation(&guard::reservation::REJECT, id, actor))
            .await
    }

    /// Requester or teacher. Only a teacher is recorded as decider.
    pub async fn cancel_reservation(&self, id: Ulid, actor: &Actor) -> Result<Reservation, LabError> {
        self.observed(ops::CANCEL_RESERVATION, self.decide_reservation(&guard::reservation::CANCEL, id, actor))
            .await
    }

    pub async fn mark_reservation_done(&self, id: Ulid, actor: &Actor) -> Result<Reservation, LabError> {
        self.observed(
            ops::MARK_RESERVATION_DONE,
            self.decide_reservation(&guard::reservation::MARK_DONE, id, actor),
        )
        .await
    }

    async fn decide_reservation(
        &self,
        transition: &Transition<ReservationStatus>,
        id: Ulid,
        actor: &Actor,
    ) -> Result<Reservation, LabError> {
        transition.check_role(actor)?;

        let current = self
            .store
            .reservation(id)
            .await?
            .ok_or_else(|| LabError::not_found(Entity::Reservation, id))?;
        transition.check_owner(actor, current.requester)?;
        transition.check_source(id, current.status)?;

        if transition.to == ReservationStatus::Approved
            && let Some(with) = self.first_overlap(current.resource_id, current.span, Some(id)).await?
        {
            return Err(Conflict::Overlap { resource_id: current.resource_id, with }.into());
        }

        let decision = Decision {
            to: transition.to,
            decided_by: transition.decider(actor),
            decided_at: now_ms(),
        };
        let updated = self
            .store
            .transition_reservation(id, transition.from, decision)
            .await
            .map_err(|e| transition.map_store_error(id, e))?;

        info!(
            reservation_id = %id,
            resource_id = %updated.resource_id,
            actor = %actor.id,
            status = %updated.status,
            "reservation decided"
        );
        self.refresh(Subject::Resource(updated.resource_id), transition.op);
        Ok(updated)
    }
}
