//! Catalog administration. Teacher-only.

use serde::Deserialize;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::Subject;
use crate::store::StoreError;

use super::error::{Conflict, Entity, LabError, ValidationError};
use super::{Lab, ops, require_teacher};

/// Input for [`Lab::create_item`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewItem {
    #[serde(flatten)]
    pub details: ItemDetails,
    pub stock: i64,
}

/// Input for [`Lab::create_resource`]. Approval is required unless stated otherwise.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewResource {
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub requires_approval: Option<bool>,
}

impl NewResource {
    fn into_details(self) -> ResourceDetails {
        ResourceDetails {
            name: self.name,
            code: self.code,
            location: self.location,
            category: self.category,
            description: self.description,
            requires_approval: self.requires_approval.unwrap_or(true),
        }
    }
}

fn check_name(name: &str) -> Result<(), ValidationError> {
    let len = name.trim().chars().count();
    if len < MIN_NAME_LEN {
        return Err(ValidationError::NameTooShort { min: MIN_NAME_LEN });
    }
    if len > MAX_NAME_LEN {
        return Err(ValidationError::TooLong { field: "name", max: MAX_NAME_LEN });
    }
    Ok(())
}

fn check_text(field: &'static str, text: Option<&str>) -> Result<(), ValidationError> {
    match text {
        Some(t) if t.chars().count() > MAX_TEXT_LEN => {
            Err(ValidationError::TooLong { field, max: MAX_TEXT_LEN })
        }
        _ => Ok(()),
    }
}

fn check_item_details(details: &ItemDetails) -> Result<(), ValidationError> {
    check_name(&details.name)?;
    check_text("code", details.code.as_deref())?;
    check_text("category", details.category.as_deref())?;
    check_text("spec summary", Some(details.spec_summary.as_str()))?;
    if let Some(url) = &details.reference_url {
        check_text("reference URL", Some(url.as_str()))?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ValidationError::BadUrl);
        }
    }
    Ok(())
}

fn check_resource_details(details: &ResourceDetails) -> Result<(), ValidationError> {
    check_name(&details.name)?;
    check_text("code", details.code.as_deref())?;
    check_text("location", details.location.as_deref())?;
    check_text("category", details.category.as_deref())?;
    check_text("description", details.description.as_deref())
}

/// Blank optional fields are stored as absent.
fn tidy(field: &mut Option<String>) {
    *field = field.take().map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
}

fn tidy_item(details: &mut ItemDetails) {
    details.name = details.name.trim().to_string();
    tidy(&mut details.code);
    tidy(&mut details.category);
    tidy(&mut details.reference_url);
}

fn tidy_resource(details: &mut ResourceDetails) {
    details.name = details.name.trim().to_string();
    tidy(&mut details.code);
    tidy(&mut details.location);
    tidy(&mut details.category);
    tidy(&mut details.description);
}

impl Lab {
    pub async fn create_item(&self, new: NewItem, actor: &Actor) -> Result<Item, LabError> {
        self.observed(ops::CREATE_ITEM, async {
            require_teacher(actor, ops::CREATE_ITEM)?;
            let mut details = new.details;
            tidy_item(&mut details);
            check_item_details(&details)?;
            if !(0..=MAX_STOCK).contains(&new.stock) {
                return Err(ValidationError::StockOutOfRange { max: MAX_STOCK }.into());
            }

            let item = Item {
                id: Ulid::new(),
                details,
                stock: new.stock,
                initial_stock: new.stock,
                created_at: now_ms(),
            };
            self.store.insert_item(item.clone()).await?;
            info!(item_id = %item.id, name = %item.details.name, stock = item.stock, "item created");
            self.refresh(Subject::Item(item.id), ops::CREATE_ITEM);
            Ok(item)
        })
        .await
    }

    /// Edit descriptive fields. Stock is untouched.
    pub async fn update_item(
        &self,
        id: Ulid,
        mut details: ItemDetails,
        actor: &Actor,
    ) -> Result<Item, LabError> {
        self.observed(ops::UPDATE_ITEM, async {
            require_teacher(actor, ops::UPDATE_ITEM)?;
            tidy_item(&mut details);
            check_item_details(&details)?;
            let item = self.store.update_item(id, details).await.map_err(|e| match e {
                StoreError::NotFound(_) => LabError::not_found(Entity::Item, id),
                other => LabError::Store(other),
            })?;
            info!(item_id = %id, "item updated");
            self.refresh(Subject::Item(id), ops::UPDATE_ITEM);
            Ok(item)
        })
        .await
    }

    /// Manual ledger entry with no originating request. Returns the new stock.
    pub async fn restock_item(&self, id: Ulid, delta: i64, actor: &Actor) -> Result<i64, LabError> {
        self.observed(ops::RESTOCK_ITEM, async {
            require_teacher(actor, ops::RESTOCK_ITEM)?;
            if delta == 0 {
                return Err(ValidationError::ZeroDelta.into());
            }
            if !(-MAX_STOCK..=MAX_STOCK).contains(&delta) {
                return Err(ValidationError::StockOutOfRange { max: MAX_STOCK }.into());
            }
            let item = self
                .store
                .item(id)
                .await?
                .ok_or_else(|| LabError::not_found(Entity::Item, id))?;

            let mv = StockMove {
                id: Ulid::new(),
                item_id: id,
                request_id: None,
                delta,
                actor: actor.id,
                at: now_ms(),
            };
            let stock = self.store.apply_stock_move(mv).await.map_err(|e| match e {
                StoreError::InsufficientStock { available, requested, .. } => {
                    Conflict::InsufficientStock {
                        item_id: id,
                        item_name: item.details.name.clone(),
                        available,
                        requested,
                    }
                    .into()
                }
                StoreError::NotFound(_) => LabError::not_found(Entity::Item, id),
                other => LabError::Store(other),
            })?;
            info!(item_id = %id, delta, stock, actor = %actor.id, "item restocked");
            self.refresh(Subject::Item(id), ops::RESTOCK_ITEM);
            Ok(stock)
        })
        .await
    }

    pub async fn create_resource(
        &self,
        new: NewResource,
        actor: &Actor,
    ) -> Result<ReservableResource, LabError> {
        self.observed(ops::CREATE_RESOURCE, async {
            require_teacher(actor, ops::CREATE_RESOURCE)?;
            let mut details = new.into_details();
            tidy_resource(&mut details);
            check_resource_details(&details)?;
            let resource = ReservableResource {
                id: Ulid::new(),
                details,
                created_at: now_ms(),
            };
            self.store.insert_resource(resource.clone()).await?;
            info!(
                resource_id = %resource.id,
                name = %resource.details.name,
                requires_approval = resource.details.requires_approval,
                "resource created"
            );
            self.refresh(Subject::Resource(resource.id), ops::CREATE_RESOURCE);
            Ok(resource)
        })
        .await
    }

    /// Edit a resource. Flipping `requires_approval` only affects new bookings.
    pub async fn update_resource(
        &self,
        id: Ulid,
        mut details: ResourceDetails,
        actor: &Actor,
    ) -> Result<ReservableResource, LabError> {
        self.observed(ops::UPDATE_RESOURCE, async {
            require_teacher(actor, ops::UPDATE_RESOURCE)?;
            tidy_resource(&mut details);
            check_resource_details(&details)?;
            let resource = self.store.update_resource(id, details).await.map_err(|e| match e {
                StoreError::NotFound(_) => LabError::not_found(Entity::Resource, id),
                other => LabError::Store(other),
            })?;
            info!(resource_id = %id, "resource updated");
            self.refresh(Subject::Resource(id), ops::UPDATE_RESOURCE);
            Ok(resource)
        })
        .await
    }
}
