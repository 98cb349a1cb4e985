use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type stored.
pub type Ms = i64;

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ── Actors ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Student,
    Teacher,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticated caller, as handed over by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Ulid,
    pub role: Role,
}

impl Actor {
    pub fn student(id: Ulid) -> Self {
        Self { id, role: Role::Student }
    }

    pub fn teacher(id: Ulid) -> Self {
        Self { id, role: Role::Teacher }
    }

    pub fn is_teacher(&self) -> bool {
        self.role == Role::Teacher
    }
}

// ── Quantity-based catalog ───────────────────────────────────────

/// Descriptive, freely editable part of an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDetails {
    pub name: String,
    pub code: Option<String>,
    pub category: Option<String>,
    pub spec_summary: String,
    pub reference_url: Option<String>,
}

/// Loanable equipment with a shared stock count.
///
/// `stock` only moves through ledger entries, so
/// `stock == initial_stock + Σ moves.delta` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: Ulid,
    pub details: ItemDetails,
    pub stock: i64,
    pub initial_stock: i64,
    pub created_at: Ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoanStatus {
    Pending,
    Approved,
    Rejected,
    Returned,
}

impl LoanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LoanStatus::Pending => "pending",
            LoanStatus::Approved => "approved",
            LoanStatus::Rejected => "rejected",
            LoanStatus::Returned => "returned",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, LoanStatus::Rejected | LoanStatus::Returned)
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanLine {
    pub item_id: Ulid,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanRequest {
    pub id: Ulid,
    pub requester: Ulid,
    pub purpose: String,
    pub status: LoanStatus,
    pub decided_by: Option<Ulid>,
    pub decided_at: Option<Ms>,
    pub created_at: Ms,
    /// Immutable once written.
    pub lines: Vec<LoanLine>,
}

/// One ledger row. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMove {
    pub id: Ulid,
    pub item_id: Ulid,
    pub request_id: Option<Ulid>,
    pub delta: i64,
    pub actor: Ulid,
    pub at: Ms,
}

// ── Interval-based catalog ───────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDetails {
    pub name: String,
    pub code: Option<String>,
    pub location: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    /// Selects the initial status of new reservations.
    pub requires_approval: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservableResource {
    pub id: Ulid,
    pub details: ResourceDetails,
    pub created_at: Ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Done,
}

impl ReservationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Approved => "approved",
            ReservationStatus::Rejected => "rejected",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Done => "done",
        }
    }

    /// Active reservations hold their interval against the resource.
    pub fn is_active(self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Approved)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub requester: Ulid,
    pub span: Span,
    pub status: ReservationStatus,
    pub decided_by: Option<Ulid>,
    pub decided_at: Option<Ms>,
    pub created_at: Ms,
}

/// A status change with its stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision<S> {
    pub to: S,
    pub decided_by: Option<Ulid>,
    pub decided_at: Ms,
}

// ── Per-resource interval state ──────────────────────────────────

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub resource: ReservableResource,
    /// All reservations ever placed, sorted by `span.start`.
    pub reservations: Vec<Reservation>,
}

impl ResourceState {
    pub fn new(resource: ReservableResource) -> Self {
        Self {
            resource,
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn find(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn find_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Return only reservations whose span overlaps the query window.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }

    /// Active reservations overlapping `query`, optionally ignoring one id.
    pub fn active_overlapping(
        &self,
        query: &Span,
        exclude: Option<Ulid>,
    ) -> impl Iterator<Item = &Reservation> {
        self.overlapping(query)
            .filter(move |r| r.status.is_active() && Some(r.id) != exclude)
    }
}

/// WAL record format. Flat, one variant per store mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ItemCreated(Item),
    ItemUpdated {
        id: Ulid,
        details: ItemDetails,
    },
    StockMoved(StockMove),
    ResourceCreated(ReservableResource),
    ResourceUpdated {
        id: Ulid,
        details: ResourceDetails,
    },
    ReservationPlaced(Reservation),
    ReservationDecided {
        id: Ulid,
        resource_id: Ulid,
        decision: Decision<ReservationStatus>,
    },
    LoanOpened(LoanRequest),
    LoanLinesAdded {
        request_id: Ulid,
        lines: Vec<LoanLine>,
    },
    LoanDecided {
        id: Ulid,
        decision: Decision<LoanStatus>,
    },
}

// ── Query result types ───────────────────────────────────────────

/// Ledger audit for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    pub item_id: Ulid,
    pub stock: i64,
    pub initial_stock: i64,
    pub ledger_sum: i64,
    pub moves: usize,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.stock == self.initial_stock + self.ledger_sum && self.stock >= 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reservation(start: Ms, end: Ms, status: ReservationStatus) -> Reservation {
        Reservation {
            id: Ulid::new(),
            resource_id: Ulid::nil(),
            requester: Ulid::new(),
            span: Span::new(start, end),
            status,
            decided_by: None,
            decided_at: None,
            created_at: 0,
        }
    }

    fn state() -> ResourceState {
        ResourceState::new(ReservableResource {
            id: Ulid::nil(),
            details: ResourceDetails {
                name: "Scope bench".into(),
                code: None,
                location: None,
                category: None,
                description: None,
                requires_approval: true,
            },
            created_at: 0,
        })
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // touching, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn reservations_kept_sorted() {
        let mut rs = state();
        rs.insert_reservation(reservation(300, 400, ReservationStatus::Pending));
        rs.insert_reservation(reservation(100, 200, ReservationStatus::Pending));
        rs.insert_reservation(reservation(200, 300, ReservationStatus::Approved));
        let starts: Vec<Ms> = rs.reservations.iter().map(|r| r.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn active_overlapping_skips_closed_and_excluded() {
        let mut rs = state();
        let cancelled = reservation(100, 200, ReservationStatus::Cancelled);
        let pending = reservation(150, 250, ReservationStatus::Pending);
        let pending_id = pending.id;
        rs.insert_reservation(cancelled);
        rs.insert_reservation(pending);

        let query = Span::new(120, 180);
        let hits: Vec<Ulid> = rs.active_overlapping(&query, None).map(|r| r.id).collect();
        assert_eq!(hits, vec![pending_id]);
        assert_eq!(rs.active_overlapping(&query, Some(pending_id)).count(), 0);
    }

    #[test]
    fn status_activity() {
        assert!(ReservationStatus::Pending.is_active());
        assert!(ReservationStatus::Approved.is_active());
        assert!(ReservationStatus::Done.is_terminal());
        assert!(LoanStatus::Returned.is_terminal());
        assert!(!LoanStatus::Approved.is_terminal());
    }

    #[test]
    fn reconciliation_consistency() {
        let ok = Reconciliation { item_id: Ulid::nil(), stock: 1, initial_stock: 3, ledger_sum: -2, moves: 1 };
        assert!(ok.is_consistent());
        let drifted = Reconciliation { stock: 2, ..ok };
        assert!(!drifted.is_consistent());
    }
}
