use std::fmt;

use thiserror::Error;
use ulid::Ulid;

use crate::model::{LoanLine, Ms};
use crate::store::StoreError;

/// Malformed or out-of-range input. Always raised before any store access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("start must be strictly before end")]
    EmptyInterval,
    #[error("timestamp {0} is outside the supported range")]
    TimestampOutOfRange(Ms),
    #[error("reservation must start and end on the same lab day")]
    SpansMultipleDays,
    #[error("reservation must lie within lab hours {open_hour:02}:00-{close_hour:02}:00")]
    OutsideLabHours { open_hour: u32, close_hour: u32 },
    #[error("duration of {minutes} minutes is outside {min}-{max}")]
    Duration { minutes: i64, min: i64, max: i64 },
    #[error("day has no valid lab window")]
    InvalidDay,
    #[error("purpose must be at least {min} characters")]
    PurposeTooShort { min: usize },
    #[error("purpose must be at most {max} characters")]
    PurposeTooLong { max: usize },
    #[error("loan request needs at least one line")]
    NoLines,
    #[error("loan request has more than {max} lines")]
    TooManyLines { max: usize },
    #[error("quantity for item {item_id} must be at least 1")]
    ZeroQuantity { item_id: Ulid },
    #[error("quantity for item {item_id} exceeds {max}")]
    QuantityTooLarge { item_id: Ulid, max: u32 },
    #[error("unknown item {0}")]
    UnknownItem(Ulid),
    #[error("name must be at least {min} characters")]
    NameTooShort { min: usize },
    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("reference URL must start with http:// or https://")]
    BadUrl,
    #[error("stock must be between 0 and {max}")]
    StockOutOfRange { max: i64 },
    #[error("stock adjustment must be non-zero")]
    ZeroDelta,
    #[error("minimum gap must be between 0 and {max} minutes")]
    GapLength { max: i64 },
}

/// Which kind of record an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Item,
    Resource,
    Reservation,
    LoanRequest,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::Item => "item",
            Entity::Resource => "resource",
            Entity::Reservation => "reservation",
            Entity::LoanRequest => "loan request",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Conflict {
    #[error("resource {resource_id} is already booked by reservation {with} in that interval")]
    Overlap { resource_id: Ulid, with: Ulid },
    #[error("insufficient stock for {item_name}: {available} available, {requested} requested")]
    InsufficientStock {
        item_id: Ulid,
        item_name: String,
        available: i64,
        requested: i64,
    },
}

impl Conflict {
    pub fn kind(&self) -> &'static str {
        match self {
            Conflict::Overlap { .. } => "overlap",
            Conflict::InsufficientStock { .. } => "insufficient_stock",
        }
    }
}

/// Where a multi-step loan mutation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Header written, lines not.
    Lines,
    /// Some per-line stock moves written, others not.
    Stock,
    /// Every stock move written, status update failed.
    Status,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Lines => "lines",
            Stage::Stock => "stock",
            Stage::Status => "status",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineFailure {
    pub line: LoanLine,
    pub error: StoreError,
}

/// State was changed but the operation did not finish. Reconcile through the
/// request's stock moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialFailure {
    pub request_id: Ulid,
    pub stage: Stage,
    pub committed: Vec<LoanLine>,
    pub failed: Vec<LineFailure>,
    /// First error that stopped the operation.
    pub cause: StoreError,
}

impl PartialFailure {
    /// Status another decision put on the request after this one had moved
    /// stock. The committed moves then belong to a closed request and only a
    /// manual restock gives them back.
    pub fn superseded_by(&self) -> Option<&'static str> {
        match (self.stage, &self.cause) {
            (Stage::Status, StoreError::StatusMismatch { current, .. }) => Some(*current),
            _ => None,
        }
    }
}

impl fmt::Display for PartialFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "loan request {} partially processed at {} stage ({} committed, {} failed): {}",
            self.request_id,
            self.stage,
            self.committed.len(),
            self.failed.len(),
            self.cause
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("{entity} {id} not found")]
    NotFound { entity: Entity, id: Ulid },
    #[error("{entity} {id} cannot go from {from} to {to}")]
    InvalidTransition {
        entity: Entity,
        id: Ulid,
        from: &'static str,
        to: &'static str,
    },
    #[error("conflict: {0}")]
    Conflict(#[from] Conflict),
    #[error("actor {actor} may not {action}")]
    Forbidden { actor: Ulid, action: &'static str },
    #[error("{0}; contact an administrator")]
    PartialFailure(Box<PartialFailure>),
    /// Infrastructure failure with nothing changed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl LabError {
    /// Some state was changed and needs reconciliation.
    pub fn is_partial(&self) -> bool {
        matches!(self, LabError::PartialFailure(_))
    }

    /// Short label for metrics.
    pub fn kind_label(&self) -> &'static str {
        match self {
            LabError::Validation(_) => "validation",
            LabError::NotFound { .. } => "not_found",
            LabError::InvalidTransition { .. } => "invalid_transition",
            LabError::Conflict(_) => "conflict",
            LabError::Forbidden { .. } => "forbidden",
            LabError::PartialFailure(_) => "partial_failure",
            LabError::Store(_) => "store",
        }
    }

    pub(crate) fn not_found(entity: Entity, id: Ulid) -> Self {
        LabError::NotFound { entity, id }
    }

    pub(crate) fn partial(failure: PartialFailure) -> Self {
        LabError::PartialFailure(Box::new(failure))
    }
}
