//! Service order workflows: create, update, delete, query.
//!
//! Creation and edits go through the OS number allocator; media drafts are
//! folded into the saved order and cleared once the save is confirmed.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    ExistingOrderSummary, LookupItem, LookupKind, MediaFile, NewOrderPayload, OrderFields,
    OrderFilters, OrderPatch, OrderScope, OrderSector, ServiceOrder, merge_by_path,
};

use super::media_pipeline::MediaPipeline;
use super::media_set::DraftKey;
use super::os_number::{OrderNumberStore, OsNumberAllocator, Reservation, Retried, SaveOutcome};

/// Persistence contract for service orders and their lookup tables.
#[async_trait]
pub trait OrderStore: OrderNumberStore {
    async fn insert_order(
        &self,
        scope: OrderScope,
        payload: NewOrderPayload,
    ) -> AppResult<ServiceOrder>;

    /// Apply `patch`; `NotFound` if the order is missing or deleted.
    async fn update_order(
        &self,
        scope: OrderScope,
        id: Uuid,
        patch: OrderPatch,
    ) -> AppResult<ServiceOrder>;

    async fn set_media_files(
        &self,
        scope: OrderScope,
        id: Uuid,
        files: &[MediaFile],
    ) -> AppResult<()>;

    async fn soft_delete_order(&self, scope: OrderScope, id: Uuid) -> AppResult<()>;

    /// Non-deleted order by id.
    async fn get_order(&self, scope: OrderScope, id: Uuid) -> AppResult<Option<ServiceOrder>>;

    /// Matching non-deleted orders and the total before pagination.
    async fn list_orders(
        &self,
        scope: OrderScope,
        filters: &OrderFilters,
    ) -> AppResult<(Vec<ServiceOrder>, u64)>;

    async fn find_situation_by_name(&self, owner_id: Uuid, name: &str) -> AppResult<Option<Uuid>>;

    async fn list_lookups(&self, owner_id: Uuid, kind: LookupKind) -> AppResult<Vec<LookupItem>>;
}

/// A saved order plus what the allocator had to do to save it.
#[derive(Debug, Serialize, ToSchema)]
pub struct SavedOrder {
    pub order: ServiceOrder,
    /// Set when the requested number was already taken before saving.
    pub reassigned_from: Option<ExistingOrderSummary>,
    /// Conflicts hit while saving, in order.
    pub retries: Vec<Retried>,
}

/// Order workflows for one shop owner.
pub struct OrderService {
    store: Arc<dyn OrderStore>,
    allocator: OsNumberAllocator<dyn OrderStore>,
    media: Arc<MediaPipeline>,
    owner_id: Uuid,
    default_situation: String,
}

impl OrderService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        media: Arc<MediaPipeline>,
        owner_id: Uuid,
        max_retries: u32,
        default_situation: impl Into<String>,
    ) -> Self {
        Self {
            allocator: OsNumberAllocator::new(store.clone(), max_retries),
            store,
            media,
            owner_id,
            default_situation: default_situation.into(),
        }
    }

    /// Replace the allocator, e.g. to shorten the retry backoff.
    pub fn with_allocator(mut self, allocator: OsNumberAllocator<dyn OrderStore>) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn owner_id(&self) -> Uuid {
        self.owner_id
    }

    pub fn media(&self) -> &Arc<MediaPipeline> {
        &self.media
    }

    pub fn allocator(&self) -> &OsNumberAllocator<dyn OrderStore> {
        &self.allocator
    }

    pub fn scope(&self, sector: OrderSector) -> OrderScope {
        OrderScope::new(self.owner_id, sector)
    }

    pub async fn next_number(&self, sector: OrderSector) -> AppResult<i32> {
        self.allocator.suggest_number(self.scope(sector)).await
    }

    pub async fn check_number(
        &self,
        sector: OrderSector,
        os_number: i32,
        exclude: Option<Uuid>,
    ) -> AppResult<Option<ExistingOrderSummary>> {
        self.allocator
            .check_number_exists(self.scope(sector), os_number, exclude)
            .await
    }

    /// Create an order, folding in the media draft when one is given.
    pub async fn create(
        &self,
        sector: OrderSector,
        fields: OrderFields,
        draft: Option<DraftKey>,
    ) -> AppResult<SavedOrder> {
        let scope = self.scope(sector);
        let mut payload = NewOrderPayload::from_fields(sector, fields)?;

        if let Some(ref key) = draft {
            let drafted = self.media.draft_files(key.clone())?;
            merge_by_path(&mut payload.media_files, drafted);
        }

        let mut reassigned_from = None;
        match payload.os_number {
            None => payload.os_number = Some(self.allocator.suggest_number(scope).await?),
            Some(requested) => {
                if let Reservation::Reassigned {
                    existing,
                    new_number,
                } = self
                    .allocator
                    .validate_and_reserve(scope, requested, None)
                    .await?
                {
                    payload.os_number = Some(new_number);
                    reassigned_from = Some(existing);
                }
            }
        }

        if payload.situation_id.is_none() {
            payload.situation_id = self
                .store
                .find_situation_by_name(self.owner_id, &self.default_situation)
                .await?;
        }

        let store = self.store.clone();
        let outcome = self
            .allocator
            .save_with_retry(scope, payload, move |p| {
                let store = store.clone();
                async move { store.insert_order(scope, p).await }
            })
            .await;

        let (mut order, retries) = match outcome {
            SaveOutcome::Succeeded {
                record, retries, ..
            } => (record, retries),
            SaveOutcome::Failed {
                error, attempts, ..
            } => {
                warn!(
                    "Creating {} order failed after {} attempt(s): {}",
                    sector, attempts, error
                );
                return Err(error);
            }
        };

        let relocated = self
            .media
            .relocate_on_first_save(order.media_files.clone(), sector, order.id)
            .await;
        if relocated != order.media_files {
            // The order exists either way; failing here would invite a
            // duplicate on retry.
            match self.store.set_media_files(scope, order.id, &relocated).await {
                Ok(()) => order.media_files = relocated,
                Err(e) => {
                    let moved: Vec<&str> = relocated.iter().map(|f| f.path.as_str()).collect();
                    error!(
                        "Order {} saved but its relocated media list was not: {}; files now at {:?}",
                        order.id, e, moved
                    );
                }
            }
        }

        if let Some(ref key) = draft {
            self.media.clear_draft(key);
        }

        info!(
            "Created {} order {} with OS number {} ({} retries)",
            sector,
            order.id,
            order.os_number,
            retries.len()
        );

        Ok(SavedOrder {
            order,
            reassigned_from,
            retries,
        })
    }

    /// Apply a partial update. A changed OS number is re-validated against
    /// other orders first.
    pub async fn update(
        &self,
        sector: OrderSector,
        id: Uuid,
        fields: OrderFields,
        draft: Option<DraftKey>,
    ) -> AppResult<SavedOrder> {
        let scope = self.scope(sector);
        let mut patch = OrderPatch::from_fields(sector, fields)?;

        if let Some(ref key) = draft
            && patch.media_files.is_none()
        {
            patch.media_files = Some(self.draft_media_for_update(sector, id, key).await?);
        }

        if patch.is_empty() {
            return Err(AppError::InvalidInput("No fields to update".to_string()));
        }

        let mut reassigned_from = None;
        if let Some(requested) = patch.os_number
            && let Reservation::Reassigned {
                existing,
                new_number,
            } = self
                .allocator
                .validate_and_reserve(scope, requested, Some(id))
                .await?
        {
            patch.os_number = Some(new_number);
            reassigned_from = Some(existing);
        }

        let store = self.store.clone();
        let outcome = self
            .allocator
            .save_with_retry(scope, patch, move |p| {
                let store = store.clone();
                async move { store.update_order(scope, id, p).await }
            })
            .await;

        let (order, retries) = match outcome {
            SaveOutcome::Succeeded {
                record, retries, ..
            } => (record, retries),
            SaveOutcome::Failed {
                error, attempts, ..
            } => {
                warn!(
                    "Updating {} order {} failed after {} attempt(s): {}",
                    sector, id, attempts, error
                );
                return Err(error);
            }
        };

        if let Some(ref key) = draft {
            self.media.clear_draft(key);
        }

        info!("Updated {} order {}", sector, id);

        Ok(SavedOrder {
            order,
            reassigned_from,
            retries,
        })
    }

    pub async fn delete(&self, sector: OrderSector, id: Uuid) -> AppResult<()> {
        self.store.soft_delete_order(self.scope(sector), id).await?;
        info!("Soft-deleted {} order {}", sector, id);
        Ok(())
    }

    pub async fn get(&self, sector: OrderSector, id: Uuid) -> AppResult<ServiceOrder> {
        self.store
            .get_order(self.scope(sector), id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {}", id)))
    }

    pub async fn list(
        &self,
        sector: OrderSector,
        filters: &OrderFilters,
    ) -> AppResult<(Vec<ServiceOrder>, u64)> {
        self.store.list_orders(self.scope(sector), filters).await
    }

    pub async fn lookups(&self, kind: LookupKind) -> AppResult<Vec<LookupItem>> {
        self.store.list_lookups(self.owner_id, kind).await
    }

    /// Media for an order's draft, recovering from storage when the stored
    /// list is empty.
    pub async fn open_draft(&self, key: DraftKey) -> AppResult<Vec<MediaFile>> {
        let server_files = match key.order_id {
            None => None,
            Some(id) => Some(self.server_media(key.sector, id).await?),
        };
        self.media.load_draft(key, server_files).await
    }

    /// The saved media of an order, or what storage holds for it when the
    /// saved list is empty.
    async fn server_media(&self, sector: OrderSector, id: Uuid) -> AppResult<Vec<MediaFile>> {
        let order = self.get(sector, id).await?;
        if order.media_files.is_empty() {
            self.media.list_order_files(sector, id).await
        } else {
            Ok(order.media_files)
        }
    }

    /// Media list an edit through `key` saves.
    ///
    /// A draft that never loaded the saved list only holds what was added
    /// through it, so the saved list goes first and the draft's files are
    /// appended.
    async fn draft_media_for_update(
        &self,
        sector: OrderSector,
        id: Uuid,
        key: &DraftKey,
    ) -> AppResult<Vec<MediaFile>> {
        let (local, loaded) = self.media.draft_snapshot(key.clone())?;
        if loaded {
            return Ok(local);
        }
        let mut merged = self.server_media(sector, id).await?;
        merge_by_path(&mut merged, local);
        Ok(merged)
    }
}
