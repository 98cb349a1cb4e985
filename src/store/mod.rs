//! Persistent store seam.
//!
//! Every store call is a single-row (or single-item) atomic step. Nothing here
//! spans several rows; multi-step units of work live in [`crate::lab`].

mod durable;
#[cfg(test)]
mod tests;

pub use durable::DurableStore;

use async_trait::async_trait;
use thiserror::Error;
use ulid::Ulid;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    /// Range-exclusion guard: an active reservation already holds part of the interval.
    #[error("interval overlaps active reservation {with}")]
    ExclusionViolation { with: Ulid },
    /// Conditional decrement refused to take stock below zero.
    #[error("item {item_id} has {available} in stock, {requested} requested")]
    InsufficientStock {
        item_id: Ulid,
        available: i64,
        requested: i64,
    },
    /// Compare-and-set on status lost: the row was not in an expected status.
    #[error("status mismatch on {id}: currently {current}")]
    StatusMismatch { id: Ulid, current: &'static str },
    #[error("WAL error: {0}")]
    Wal(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    // ── Items ────────────────────────────────────────────────

    async fn insert_item(&self, item: Item) -> Result<(), StoreError>;
    async fn update_item(&self, id: Ulid, details: ItemDetails) -> Result<Item, StoreError>;
    async fn item(&self, id: Ulid) -> Result<Option<Item>, StoreError>;
    async fn items(&self) -> Result<Vec<Item>, StoreError>;

    /// Adjust the item's stock by `mv.delta` and append `mv` to its ledger as
    /// one step. Refuses with `InsufficientStock` if stock would go negative.
    /// Returns the new stock.
    async fn apply_stock_move(&self, mv: StockMove) -> Result<i64, StoreError>;
    async fn stock_moves_for_item(&self, item_id: Ulid) -> Result<Vec<StockMove>, StoreError>;
    async fn stock_moves_for_request(&self, request_id: Ulid) -> Result<Vec<StockMove>, StoreError>;

    // ── Reservable resources ─────────────────────────────────

    async fn insert_resource(&self, resource: ReservableResource) -> Result<(), StoreError>;
    async fn update_resource(
        &self,
        id: Ulid,
        details: ResourceDetails,
    ) -> Result<ReservableResource, StoreError>;
    async fn resource(&self, id: Ulid) -> Result<Option<ReservableResource>, StoreError>;
    async fn resources(&self) -> Result<Vec<ReservableResource>, StoreError>;

    // ── Reservations ─────────────────────────────────────────

    /// Active (`pending`/`approved`) reservations on the resource overlapping `span`.
    async fn active_overlapping(
        &self,
        resource_id: Ulid,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Reservation>, StoreError>;
    /// Insert guarded by the exclusion constraint on active intervals.
    async fn insert_reservation(&self, reservation: Reservation) -> Result<(), StoreError>;
    async fn reservation(&self, id: Ulid) -> Result<Option<Reservation>, StoreError>;
    async fn reservations_for_resource(&self, resource_id: Ulid) -> Result<Vec<Reservation>, StoreError>;
    async fn reservations_for_requester(&self, requester: Ulid) -> Result<Vec<Reservation>, StoreError>;
    /// Compare-and-set: apply `decision` only if the current status is in `expected`.
    async fn transition_reservation(
        &self,
        id: Ulid,
        expected: &[ReservationStatus],
        decision: Decision<ReservationStatus>,
    ) -> Result<Reservation, StoreError>;

    // ── Loan requests ────────────────────────────────────────

    /// Insert the request header. `request.lines` is ignored; lines are
    /// written separately by [`Store::insert_loan_lines`].
    async fn insert_loan_request(&self, request: LoanRequest) -> Result<(), StoreError>;
    async fn insert_loan_lines(&self, request_id: Ulid, lines: Vec<LoanLine>) -> Result<(), StoreError>;
    async fn loan_request(&self, id: Ulid) -> Result<Option<LoanRequest>, StoreError>;
    async fn loan_requests_for_requester(&self, requester: Ulid) -> Result<Vec<LoanRequest>, StoreError>;
    async fn loan_requests_with_status(&self, status: LoanStatus) -> Result<Vec<LoanRequest>, StoreError>;
    /// Compare-and-set: apply `decision` only if the current status is `expected`.
    async fn transition_loan(
        &self,
        id: Ulid,
        expected: LoanStatus,
        decision: Decision<LoanStatus>,
    ) -> Result<LoanRequest, StoreError>;
}
