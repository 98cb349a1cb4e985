//! Capacity oracle: read-only answers to "is this allocation satisfiable now".
//!
//! Results are advisory. Stock and bookings can change between the read and
//! the write; the store's guarded writes have the final word.

use chrono::NaiveDate;
use tracing::debug;
use ulid::Ulid;

use crate::limits::MAX_GAP_MINUTES;
use crate::model::*;
use crate::store::StoreError;

use super::error::{Conflict, Entity, LabError, ValidationError};
use super::Lab;

/// Stock an approval needs from one item, summed across its lines.
pub(super) struct Demand {
    pub item_id: Ulid,
    pub name: String,
    pub available: i64,
    pub requested: i64,
}

impl Demand {
    pub fn is_covered(&self) -> bool {
        self.available >= self.requested
    }

    pub fn shortfall(&self) -> Conflict {
        Conflict::InsufficientStock {
            item_id: self.item_id,
            item_name: self.name.clone(),
            available: self.available,
            requested: self.requested,
        }
    }
}

impl Lab {
    /// Any active reservation on the resource overlapping `span`, other than `exclude`.
    pub async fn has_overlap(
        &self,
        resource_id: Ulid,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<bool, LabError> {
        Ok(self.first_overlap(resource_id, span, exclude).await?.is_some())
    }

    /// `item.stock >= quantity` at the instant of the read.
    pub async fn sufficient_stock(&self, item_id: Ulid, quantity: u32) -> Result<bool, LabError> {
        let demand = self.demand(&[LoanLine { item_id, quantity }]).await?;
        Ok(demand.iter().all(Demand::is_covered))
    }

    /// Current stock against the summed quantity of each item's lines, in
    /// first-seen order.
    pub(super) async fn demand(&self, lines: &[LoanLine]) -> Result<Vec<Demand>, LabError> {
        let mut demand: Vec<Demand> = Vec::new();
        for line in lines {
            if let Some(d) = demand.iter_mut().find(|d| d.item_id == line.item_id) {
                d.requested += i64::from(line.quantity);
                continue;
            }
            let item = self
                .store
                .item(line.item_id)
                .await?
                .ok_or_else(|| LabError::not_found(Entity::Item, line.item_id))?;
            demand.push(Demand {
                item_id: item.id,
                name: item.details.name,
                available: item.stock,
                requested: i64::from(line.quantity),
            });
        }
        for d in &demand {
            debug!(item_id = %d.item_id, stock = d.available, requested = d.requested, ok = d.is_covered(), "stock check");
        }
        Ok(demand)
    }

    pub(super) async fn first_overlap(
        &self,
        resource_id: Ulid,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<Option<Ulid>, LabError> {
        let hits = self
            .store
            .active_overlapping(resource_id, span, exclude)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(id) if id == resource_id => {
                    LabError::not_found(Entity::Resource, resource_id)
                }
                other => LabError::Store(other),
            })?;
        let with = hits.first().map(|r| r.id);
        debug!(%resource_id, start = span.start, end = span.end, ?with, "overlap check");
        Ok(with)
    }

    /// Free stretches of one lab day on a resource, at least `min_minutes` long.
    pub async fn availability(
        &self,
        resource_id: Ulid,
        day: NaiveDate,
        min_minutes: i64,
    ) -> Result<Vec<Span>, LabError> {
        if !(0..=MAX_GAP_MINUTES).contains(&min_minutes) {
            return Err(ValidationError::GapLength { max: MAX_GAP_MINUTES }.into());
        }
        let window = self.hours.day_window(day)?;
        let mut busy: Vec<Span> = self
            .store
            .active_overlapping(resource_id, window, None)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => {
                    LabError::not_found(Entity::Resource, resource_id)
                }
                other => LabError::Store(other),
            })?
            .into_iter()
            .map(|r| r.span)
            .collect();
        busy.sort_by_key(|s| s.start);
        Ok(free_gaps(window, &busy, min_minutes * 60_000))
    }
}

/// `window` minus `busy` (sorted by start), keeping gaps of at least `min_len`.
pub fn free_gaps(window: Span, busy: &[Span], min_len: Ms) -> Vec<Span> {
    let merged = merge_overlapping(busy);
    subtract_intervals(&[window], &merged)
        .into_iter()
        .filter(|gap| gap.duration_ms() >= min_len)
        .collect()
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Remove sorted, disjoint `to_remove` from sorted, disjoint `base`.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < b.end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < b.end {
            result.push(Span::new(current_start, b.end));
        }
    }

    result
}
