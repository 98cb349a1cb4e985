//! Allocation core: entry points for reservations, loans and the catalog.
//!
//! Every operation is an independent unit of work against the [`Store`].
//! Role checks and input validation happen before the first store call;
//! refresh signals go out only after the store has committed.

mod catalog;
mod error;
mod guard;
mod loans;
mod oracle;
mod queries;
mod reservations;

pub use catalog::{NewItem, NewResource};
pub use error::{Conflict, Entity, LabError, LineFailure, PartialFailure, Stage, ValidationError};
pub use oracle::{free_gaps, merge_overlapping, subtract_intervals};

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::warn;

use crate::model::Actor;
use crate::notify::{NotifyHub, Subject};
use crate::observability;
use crate::store::Store;
use crate::window::LabHours;

/// Short operation names used as metric labels and refresh tags.
pub mod ops {
    pub const CREATE_RESERVATION: &str = "create_reservation";
    pub const APPROVE_RESERVATION: &str = "approve_reservation";
    pub const REJECT_RESERVATION: &str = "reject_reservation";
    pub const CANCEL_RESERVATION: &str = "cancel_reservation";
    pub const MARK_RESERVATION_DONE: &str = "mark_reservation_done";
    pub const CREATE_LOAN: &str = "create_loan_request";
    pub const APPROVE_LOAN: &str = "approve_loan_request";
    pub const REJECT_LOAN: &str = "reject_loan_request";
    pub const RETURN_LOAN: &str = "return_loan_request";
    pub const CREATE_ITEM: &str = "create_item";
    pub const UPDATE_ITEM: &str = "update_item";
    pub const RESTOCK_ITEM: &str = "restock_item";
    pub const CREATE_RESOURCE: &str = "create_resource";
    pub const UPDATE_RESOURCE: &str = "update_resource";
}

pub struct Lab {
    store: Arc<dyn Store>,
    notify: Arc<NotifyHub>,
    hours: LabHours,
}

impl Lab {
    pub fn new(store: Arc<dyn Store>, notify: Arc<NotifyHub>, hours: LabHours) -> Self {
        Self { store, notify, hours }
    }

    pub fn notify(&self) -> &Arc<NotifyHub> {
        &self.notify
    }

    /// Run one operation, recording its outcome.
    async fn observed<T>(
        &self,
        op: &'static str,
        work: impl Future<Output = Result<T, LabError>>,
    ) -> Result<T, LabError> {
        let started = Instant::now();
        let result = work.await;
        match &result {
            Ok(_) => observability::record_operation(op, "ok", started),
            Err(e) => {
                observability::record_operation(op, e.kind_label(), started);
                match e {
                    LabError::Conflict(c) => {
                        observability::record_conflict(c.kind());
                        warn!(op, "{c}");
                    }
                    LabError::PartialFailure(p) => {
                        observability::record_partial_failure(op);
                        warn!(op, request_id = %p.request_id, stage = %p.stage, "{p}");
                    }
                    _ => {}
                }
            }
        }
        result
    }

    fn refresh(&self, subject: Subject, op: &'static str) {
        self.notify.send(subject, op);
    }
}

fn require_teacher(actor: &Actor, action: &'static str) -> Result<(), LabError> {
    if actor.is_teacher() {
        Ok(())
    } else {
        Err(LabError::Forbidden { actor: actor.id, action })
    }
}

fn require_student(actor: &Actor, action: &'static str) -> Result<(), LabError> {
    if actor.is_teacher() {
        Err(LabError::Forbidden { actor: actor.id, action })
    } else {
        Ok(())
    }
}
