//! Read-only listings. Any actor, no synchronization beyond the store's own.

use ulid::Ulid;

use crate::model::*;
use crate::store::StoreError;

use super::error::{Entity, LabError};
use super::Lab;

fn missing(entity: Entity, id: Ulid) -> impl FnOnce(StoreError) -> LabError {
    move |e| match e {
        StoreError::NotFound(_) => LabError::not_found(entity, id),
        other => LabError::Store(other),
    }
}

impl Lab {
    pub async fn items(&self) -> Result<Vec<Item>, LabError> {
        Ok(self.store.items().await?)
    }

    pub async fn item(&self, id: Ulid) -> Result<Item, LabError> {
        self.store
            .item(id)
            .await?
            .ok_or_else(|| LabError::not_found(Entity::Item, id))
    }

    pub async fn resources(&self) -> Result<Vec<ReservableResource>, LabError> {
        Ok(self.store.resources().await?)
    }

    pub async fn resource(&self, id: Ulid) -> Result<ReservableResource, LabError> {
        self.store
            .resource(id)
            .await?
            .ok_or_else(|| LabError::not_found(Entity::Resource, id))
    }

    pub async fn reservation(&self, id: Ulid) -> Result<Reservation, LabError> {
        self.store
            .reservation(id)
            .await?
            .ok_or_else(|| LabError::not_found(Entity::Reservation, id))
    }

    /// Every reservation on a resource, ordered by start.
    pub async fn reservations_for_resource(&self, resource_id: Ulid) -> Result<Vec<Reservation>, LabError> {
        self.store
            .reservations_for_resource(resource_id)
            .await
            .map_err(missing(Entity::Resource, resource_id))
    }

    pub async fn reservations_for_requester(&self, requester: Ulid) -> Result<Vec<Reservation>, LabError> {
        Ok(self.store.reservations_for_requester(requester).await?)
    }

    pub async fn loan_request(&self, id: Ulid) -> Result<LoanRequest, LabError> {
        self.store
            .loan_request(id)
            .await?
            .ok_or_else(|| LabError::not_found(Entity::LoanRequest, id))
    }

    pub async fn loan_requests_for_requester(&self, requester: Ulid) -> Result<Vec<LoanRequest>, LabError> {
        Ok(self.store.loan_requests_for_requester(requester).await?)
    }

    /// Queue for teachers, oldest first.
    pub async fn pending_loan_requests(&self) -> Result<Vec<LoanRequest>, LabError> {
        Ok(self.store.loan_requests_with_status(LoanStatus::Pending).await?)
    }

    pub async fn stock_moves_for_item(&self, item_id: Ulid) -> Result<Vec<StockMove>, LabError> {
        self.store
            .stock_moves_for_item(item_id)
            .await
            .map_err(missing(Entity::Item, item_id))
    }

    pub async fn stock_moves_for_request(&self, request_id: Ulid) -> Result<Vec<StockMove>, LabError> {
        Ok(self.store.stock_moves_for_request(request_id).await?)
    }

    /// Compare an item's stock with its ledger.
    pub async fn reconcile_item(&self, item_id: Ulid) -> Result<Reconciliation, LabError> {
        let item = self.item(item_id).await?;
        let moves = self.stock_moves_for_item(item_id).await?;
        Ok(Reconciliation {
            item_id,
            stock: item.stock,
            initial_stock: item.initial_stock,
            ledger_sum: moves.iter().map(|m| m.delta).sum(),
            moves: moves.len(),
        })
    }
}
