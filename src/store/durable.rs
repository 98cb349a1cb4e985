use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tracing::{info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability;
use crate::wal::Wal;

use super::{Store, StoreError};

type SharedResourceState = Arc<RwLock<ResourceState>>;
type SharedItemState = Arc<Mutex<ItemState>>;
type SharedLoan = Arc<Mutex<LoanRequest>>;

/// An item together with its ledger rows.
#[derive(Debug, Clone)]
struct ItemState {
    item: Item,
    moves: Vec<StockMove>,
}

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first append, drains whatever else is already queued,
/// then pays a single fsync for the whole batch.
async fn wal_writer_loop(mut wal: Wal<Event>, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal<Event>, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so buffered bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal<Event>, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let result = wal.append_buffered(&event).and_then(|()| wal.flush_sync());
            let _ = response.send(result);
        }
    }
}

// ── Event application (caller holds the entity lock) ─────

fn apply_to_item(st: &mut ItemState, event: &Event) {
    match event {
        Event::ItemUpdated { details, .. } => st.item.details = details.clone(),
        Event::StockMoved(mv) => {
            st.item.stock += mv.delta;
            st.moves.push(mv.clone());
        }
        _ => {}
    }
}

fn apply_to_resource(rs: &mut ResourceState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ResourceUpdated { details, .. } => rs.resource.details = details.clone(),
        Event::ReservationPlaced(reservation) => {
            index.insert(reservation.id, reservation.resource_id);
            rs.insert_reservation(reservation.clone());
        }
        Event::ReservationDecided { id, decision, .. } => {
            if let Some(r) = rs.find_mut(*id) {
                r.status = decision.to;
                r.decided_by = decision.decided_by;
                r.decided_at = Some(decision.decided_at);
            }
        }
        _ => {}
    }
}

fn apply_to_loan(loan: &mut LoanRequest, event: &Event) {
    match event {
        Event::LoanLinesAdded { lines, .. } => loan.lines.extend_from_slice(lines),
        Event::LoanDecided { decision, .. } => {
            loan.status = decision.to;
            loan.decided_by = decision.decided_by;
            loan.decided_at = Some(decision.decided_at);
        }
        _ => {}
    }
}

/// Counts of loaded entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub items: usize,
    pub resources: usize,
    pub reservations: usize,
    pub loan_requests: usize,
}

/// WAL-backed store. State lives in memory; every mutation is durable
/// before it becomes visible.
pub struct DurableStore {
    items: DashMap<Ulid, SharedItemState>,
    resources: DashMap<Ulid, SharedResourceState>,
    loans: DashMap<Ulid, SharedLoan>,
    /// Reverse lookup: reservation id → resource id
    reservation_to_resource: DashMap<Ulid, Ulid>,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Mutations hold it shared; compaction holds it exclusively so no
    /// append can land between the snapshot and the file swap.
    gate: RwLock<()>,
}

impl DurableStore {
    /// Replay the WAL at `path` and start its writer task.
    pub fn open(path: &Path) -> io::Result<Self> {
        let replay = Wal::<Event>::replay(path)?;
        if replay.discarded_tail {
            warn!(path = %path.display(), kept = replay.records.len(), "discarded torn WAL tail during replay");
            Wal::rewrite(path, &replay.records)?;
        }
        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            items: DashMap::new(),
            resources: DashMap::new(),
            loans: DashMap::new(),
            reservation_to_resource: DashMap::new(),
            wal_tx,
            gate: RwLock::new(()),
        };
        let replayed = replay.records.len();
        for event in replay.records {
            store.apply_replayed(event);
        }
        info!(events = replayed, path = %path.display(), "store opened");
        Ok(store)
    }

    /// Replay path: the store is the sole owner of every Arc, so `Arc::get_mut`
    /// reaches the state without locking.
    fn apply_replayed(&self, event: Event) {
        match event {
            Event::ItemCreated(item) => {
                let id = item.id;
                let st = ItemState { item, moves: Vec::new() };
                self.items.insert(id, Arc::new(Mutex::new(st)));
            }
            Event::ResourceCreated(resource) => {
                let id = resource.id;
                self.resources.insert(id, Arc::new(RwLock::new(ResourceState::new(resource))));
            }
            Event::LoanOpened(loan) => {
                self.loans.insert(loan.id, Arc::new(Mutex::new(loan)));
            }
            Event::ItemUpdated { id, .. } => {
                if let Some(mut entry) = self.items.get_mut(&id)
                    && let Some(st) = Arc::get_mut(entry.value_mut())
                {
                    apply_to_item(st.get_mut(), &event);
                }
            }
            Event::StockMoved(ref mv) => {
                if let Some(mut entry) = self.items.get_mut(&mv.item_id)
                    && let Some(st) = Arc::get_mut(entry.value_mut())
                {
                    apply_to_item(st.get_mut(), &event);
                }
            }
            Event::ResourceUpdated { id, .. }
            | Event::ReservationDecided { resource_id: id, .. } => {
                if let Some(mut entry) = self.resources.get_mut(&id)
                    && let Some(rs) = Arc::get_mut(entry.value_mut())
                {
                    apply_to_resource(rs.get_mut(), &event, &self.reservation_to_resource);
                }
            }
            Event::ReservationPlaced(ref r) => {
                if let Some(mut entry) = self.resources.get_mut(&r.resource_id)
                    && let Some(rs) = Arc::get_mut(entry.value_mut())
                {
                    apply_to_resource(rs.get_mut(), &event, &self.reservation_to_resource);
                }
            }
            Event::LoanLinesAdded { request_id: id, .. } | Event::LoanDecided { id, .. } => {
                if let Some(mut entry) = self.loans.get_mut(&id)
                    && let Some(loan) = Arc::get_mut(entry.value_mut())
                {
                    apply_to_loan(loan.get_mut(), &event);
                }
            }
        }
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    fn item_state(&self, id: &Ulid) -> Option<SharedItemState> {
        self.items.get(id).map(|e| e.value().clone())
    }

    fn resource_state(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.resources.get(id).map(|e| e.value().clone())
    }

    fn loan_state(&self, id: &Ulid) -> Option<SharedLoan> {
        self.loans.get(id).map(|e| e.value().clone())
    }

    fn all_resource_states(&self) -> Vec<SharedResourceState> {
        self.resources.iter().map(|e| e.value().clone()).collect()
    }

    fn all_item_states(&self) -> Vec<SharedItemState> {
        self.items.iter().map(|e| e.value().clone()).collect()
    }

    fn all_loans(&self) -> Vec<SharedLoan> {
        self.loans.iter().map(|e| e.value().clone()).collect()
    }

    /// Lookup reservation → resource, acquire that resource's write lock.
    async fn resolve_reservation_write(
        &self,
        id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<ResourceState>, StoreError> {
        let resource_id = self
            .reservation_to_resource
            .get(id)
            .map(|e| *e.value())
            .ok_or(StoreError::NotFound(*id))?;
        let rs = self
            .resource_state(&resource_id)
            .ok_or(StoreError::NotFound(resource_id))?;
        Ok(rs.write_owned().await)
    }

    async fn loans_matching(&self, keep: impl Fn(&LoanRequest) -> bool) -> Vec<LoanRequest> {
        let mut out = Vec::new();
        for loan in self.all_loans() {
            let guard = loan.lock().await;
            if keep(&guard) {
                out.push(guard.clone());
            }
        }
        out.sort_by_key(|l| (l.created_at, l.id));
        out
    }

    pub async fn stats(&self) -> StoreStats {
        let mut reservations = 0;
        for rs in self.all_resource_states() {
            reservations += rs.read().await.reservations.len();
        }
        StoreStats {
            items: self.items.len(),
            resources: self.resources.len(),
            reservations,
            loan_requests: self.loans.len(),
        }
    }

    /// Rewrite the WAL with only the events needed to rebuild current state.
    /// Ledger rows are kept in full; status churn and edits collapse.
    pub async fn compact(&self) -> Result<usize, StoreError> {
        let _gate = self.gate.write().await;
        let mut events = Vec::new();

        for st in self.all_item_states() {
            let guard = st.lock().await;
            let mut item = guard.item.clone();
            item.stock = item.initial_stock;
            events.push(Event::ItemCreated(item));
            events.extend(guard.moves.iter().cloned().map(Event::StockMoved));
        }
        for rs in self.all_resource_states() {
            let guard = rs.read().await;
            events.push(Event::ResourceCreated(guard.resource.clone()));
            events.extend(guard.reservations.iter().cloned().map(Event::ReservationPlaced));
        }
        for loan in self.loans_matching(|_| true).await {
            events.push(Event::LoanOpened(loan));
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))?;
        Ok(count)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl Store for DurableStore {
    async fn insert_item(&self, item: Item) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        if self.items.contains_key(&item.id) {
            return Err(StoreError::AlreadyExists(item.id));
        }
        let event = Event::ItemCreated(item.clone());
        self.wal_append(&event).await?;
        metrics::gauge!(observability::ITEM_STOCK, "item" => item.id.to_string()).set(item.stock as f64);
        self.items
            .insert(item.id, Arc::new(Mutex::new(ItemState { item, moves: Vec::new() })));
        Ok(())
    }

    async fn update_item(&self, id: Ulid, details: ItemDetails) -> Result<Item, StoreError> {
        let _gate = self.gate.read().await;
        let st = self.item_state(&id).ok_or(StoreError::NotFound(id))?;
        let mut guard = st.lock().await;
        let event = Event::ItemUpdated { id, details };
        self.wal_append(&event).await?;
        apply_to_item(&mut guard, &event);
        Ok(guard.item.clone())
    }

    async fn item(&self, id: Ulid) -> Result<Option<Item>, StoreError> {
        match self.item_state(&id) {
            Some(st) => Ok(Some(st.lock().await.item.clone())),
            None => Ok(None),
        }
    }

    async fn items(&self) -> Result<Vec<Item>, StoreError> {
        let mut out = Vec::new();
        for st in self.all_item_states() {
            out.push(st.lock().await.item.clone());
        }
        out.sort_by(|a, b| a.details.name.cmp(&b.details.name));
        Ok(out)
    }

    async fn apply_stock_move(&self, mv: StockMove) -> Result<i64, StoreError> {
        let _gate = self.gate.read().await;
        let st = self.item_state(&mv.item_id).ok_or(StoreError::NotFound(mv.item_id))?;
        let mut guard = st.lock().await;
        let available = guard.item.stock;
        if available + mv.delta < 0 {
            return Err(StoreError::InsufficientStock {
                item_id: mv.item_id,
                available,
                requested: -mv.delta,
            });
        }
        let item_id = mv.item_id;
        let event = Event::StockMoved(mv);
        self.wal_append(&event).await?;
        apply_to_item(&mut guard, &event);
        let stock = guard.item.stock;
        metrics::gauge!(observability::ITEM_STOCK, "item" => item_id.to_string()).set(stock as f64);
        Ok(stock)
    }

    async fn stock_moves_for_item(&self, item_id: Ulid) -> Result<Vec<StockMove>, StoreError> {
        let st = self.item_state(&item_id).ok_or(StoreError::NotFound(item_id))?;
        Ok(st.lock().await.moves.clone())
    }

    async fn stock_moves_for_request(&self, request_id: Ulid) -> Result<Vec<StockMove>, StoreError> {
        let mut out = Vec::new();
        for st in self.all_item_states() {
            let guard = st.lock().await;
            out.extend(
                guard
                    .moves
                    .iter()
                    .filter(|m| m.request_id == Some(request_id))
                    .cloned(),
            );
        }
        out.sort_by_key(|m| (m.at, m.id));
        Ok(out)
    }

    async fn insert_resource(&self, resource: ReservableResource) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        if self.resources.contains_key(&resource.id) {
            return Err(StoreError::AlreadyExists(resource.id));
        }
        let event = Event::ResourceCreated(resource.clone());
        self.wal_append(&event).await?;
        self.resources
            .insert(resource.id, Arc::new(RwLock::new(ResourceState::new(resource))));
        Ok(())
    }

    async fn update_resource(
        &self,
        id: Ulid,
        details: ResourceDetails,
    ) -> Result<ReservableResource, StoreError> {
        let _gate = self.gate.read().await;
        let rs = self.resource_state(&id).ok_or(StoreError::NotFound(id))?;
        let mut guard = rs.write().await;
        let event = Event::ResourceUpdated { id, details };
        self.wal_append(&event).await?;
        apply_to_resource(&mut guard, &event, &self.reservation_to_resource);
        Ok(guard.resource.clone())
    }

    async fn resource(&self, id: Ulid) -> Result<Option<ReservableResource>, StoreError> {
        match self.resource_state(&id) {
            Some(rs) => Ok(Some(rs.read().await.resource.clone())),
            None => Ok(None),
        }
    }

    async fn resources(&self) -> Result<Vec<ReservableResource>, StoreError> {
        let mut out = Vec::new();
        for rs in self.all_resource_states() {
            out.push(rs.read().await.resource.clone());
        }
        out.sort_by(|a, b| a.details.name.cmp(&b.details.name));
        Ok(out)
    }

    async fn active_overlapping(
        &self,
        resource_id: Ulid,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Reservation>, StoreError> {
        let rs = self
            .resource_state(&resource_id)
            .ok_or(StoreError::NotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(guard.active_overlapping(&span, exclude).cloned().collect())
    }

    async fn insert_reservation(&self, reservation: Reservation) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        let resource_id = reservation.resource_id;
        let rs = self
            .resource_state(&resource_id)
            .ok_or(StoreError::NotFound(resource_id))?;
        let mut guard = rs.write().await;
        if self.reservation_to_resource.contains_key(&reservation.id) {
            return Err(StoreError::AlreadyExists(reservation.id));
        }
        if reservation.status.is_active()
            && let Some(existing) = guard.active_overlapping(&reservation.span, None).next()
        {
            return Err(StoreError::ExclusionViolation { with: existing.id });
        }
        let event = Event::ReservationPlaced(reservation);
        self.wal_append(&event).await?;
        apply_to_resource(&mut guard, &event, &self.reservation_to_resource);
        Ok(())
    }

    async fn reservation(&self, id: Ulid) -> Result<Option<Reservation>, StoreError> {
        let Some(resource_id) = self.reservation_to_resource.get(&id).map(|e| *e.value()) else {
            return Ok(None);
        };
        let rs = self
            .resource_state(&resource_id)
            .ok_or(StoreError::NotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(guard.find(id).cloned())
    }

    async fn reservations_for_resource(&self, resource_id: Ulid) -> Result<Vec<Reservation>, StoreError> {
        let rs = self
            .resource_state(&resource_id)
            .ok_or(StoreError::NotFound(resource_id))?;
        Ok(rs.read().await.reservations.clone())
    }

    async fn reservations_for_requester(&self, requester: Ulid) -> Result<Vec<Reservation>, StoreError> {
        let mut out = Vec::new();
        for rs in self.all_resource_states() {
            let guard = rs.read().await;
            out.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| r.requester == requester)
                    .cloned(),
            );
        }
        out.sort_by_key(|r| (r.span.start, r.id));
        Ok(out)
    }

    async fn transition_reservation(
        &self,
        id: Ulid,
        expected: &[ReservationStatus],
        decision: Decision<ReservationStatus>,
    ) -> Result<Reservation, StoreError> {
        let _gate = self.gate.read().await;
        let mut guard = self.resolve_reservation_write(&id).await?;
        let (resource_id, current) = match guard.find(id) {
            Some(r) => (r.resource_id, r.status),
            None => return Err(StoreError::NotFound(id)),
        };
        if !expected.contains(&current) {
            return Err(StoreError::StatusMismatch { id, current: current.as_str() });
        }
        let event = Event::ReservationDecided { id, resource_id, decision };
        self.wal_append(&event).await?;
        apply_to_resource(&mut guard, &event, &self.reservation_to_resource);
        guard.find(id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn insert_loan_request(&self, mut request: LoanRequest) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        if self.loans.contains_key(&request.id) {
            return Err(StoreError::AlreadyExists(request.id));
        }
        request.lines.clear();
        let event = Event::LoanOpened(request.clone());
        self.wal_append(&event).await?;
        self.loans.insert(request.id, Arc::new(Mutex::new(request)));
        Ok(())
    }

    async fn insert_loan_lines(&self, request_id: Ulid, lines: Vec<LoanLine>) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        let loan = self.loan_state(&request_id).ok_or(StoreError::NotFound(request_id))?;
        let mut guard = loan.lock().await;
        if !guard.lines.is_empty() {
            return Err(StoreError::AlreadyExists(request_id));
        }
        if let Some(line) = lines.iter().find(|l| !self.items.contains_key(&l.item_id)) {
            return Err(StoreError::NotFound(line.item_id));
        }
        let event = Event::LoanLinesAdded { request_id, lines };
        self.wal_append(&event).await?;
        apply_to_loan(&mut guard, &event);
        Ok(())
    }

    async fn loan_request(&self, id: Ulid) -> Result<Option<LoanRequest>, StoreError> {
        match self.loan_state(&id) {
            Some(loan) => Ok(Some(loan.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn loan_requests_for_requester(&self, requester: Ulid) -> Result<Vec<LoanRequest>, StoreError> {
        Ok(self.loans_matching(|l| l.requester == requester).await)
    }

    async fn loan_requests_with_status(&self, status: LoanStatus) -> Result<Vec<LoanRequest>, StoreError> {
        Ok(self.loans_matching(|l| l.status == status).await)
    }

    async fn transition_loan(
        &self,
        id: Ulid,
        expected: LoanStatus,
        decision: Decision<LoanStatus>,
    ) -> Result<LoanRequest, StoreError> {
        let _gate = self.gate.read().await;
        let loan = self.loan_state(&id).ok_or(StoreError::NotFound(id))?;
        let mut guard = loan.lock().await;
        if guard.status != expected {
            return Err(StoreError::StatusMismatch { id, current: guard.status.as_str() });
        }
        let event = Event::LoanDecided { id, decision };
        self.wal_append(&event).await?;
        apply_to_loan(&mut guard, &event);
        Ok(guard.clone())
    }
}
