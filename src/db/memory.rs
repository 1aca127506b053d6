//! In-process order store.
//!
//! Enforces the same per-scope uniqueness as the database's partial index
//! and runs the same next-number oracle, so allocator and API behavior can
//! be exercised without PostgreSQL.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    ExistingOrderSummary, LookupItem, LookupKind, MediaFile, NewOrderPayload, OrderDetails,
    OrderFilters, OrderPatch, OrderScope, ServiceOrder,
};
use crate::services::orders::OrderStore;
use crate::services::os_number::OrderNumberStore;

struct StoredOrder {
    owner_id: Uuid,
    deleted: bool,
    order: ServiceOrder,
}

impl StoredOrder {
    fn in_scope(&self, scope: OrderScope) -> bool {
        !self.deleted && self.owner_id == scope.owner_id && self.order.sector == scope.sector
    }
}

#[derive(Default)]
struct Inner {
    orders: Vec<StoredOrder>,
    counters: HashMap<(Uuid, &'static str), i32>,
    lookups: Vec<(Uuid, LookupKind, LookupItem)>,
}

impl Inner {
    fn holder(&self, scope: OrderScope, os_number: i32, exclude: Option<Uuid>) -> Option<&StoredOrder> {
        self.orders.iter().find(|s| {
            s.in_scope(scope) && s.order.os_number == os_number && Some(s.order.id) != exclude
        })
    }

    fn highest(&self, scope: OrderScope) -> Option<i32> {
        self.orders
            .iter()
            .filter(|s| s.in_scope(scope))
            .map(|s| s.order.os_number)
            .max()
    }
}

/// Order store kept in memory.
#[derive(Default)]
pub struct MemoryOrderStore {
    inner: Mutex<Inner>,
    oracle_down: AtomicBool,
    media_writes_down: AtomicBool,
    stolen_inserts: AtomicU32,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next-number oracle fail until re-enabled.
    pub fn set_oracle_down(&self, down: bool) {
        self.oracle_down.store(down, Ordering::SeqCst);
    }

    /// Make `set_media_files` fail until re-enabled.
    pub fn set_media_writes_down(&self, down: bool) {
        self.media_writes_down.store(down, Ordering::SeqCst);
    }

    /// For the next `count` inserts, a competing order grabs the requested
    /// number just before the insert lands.
    pub fn steal_next_inserts(&self, count: u32) {
        self.stolen_inserts.store(count, Ordering::SeqCst);
    }

    pub fn add_lookup(&self, owner_id: Uuid, kind: LookupKind, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        let mut inner = self.lock();
        inner.lookups.push((
            owner_id,
            kind,
            LookupItem {
                id,
                name: name.to_string(),
                color: None,
            },
        ));
        id
    }

    /// Number of non-deleted orders in `scope`.
    pub fn active_count(&self, scope: OrderScope) -> usize {
        self.lock().orders.iter().filter(|s| s.in_scope(scope)).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_stolen_insert(&self) -> bool {
        self.stolen_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn build_order(scope: OrderScope, payload: NewOrderPayload, os_number: i32) -> ServiceOrder {
    let now = Utc::now();
    let (device_brand, device_model, device_serial, equipment_type, location, accessories) =
        match payload.details {
            OrderDetails::Phone(d) => (d.brand, Some(d.model), d.imei, None, None, d.accessories),
            OrderDetails::Computer(d) => (
                d.brand,
                d.model,
                d.serial,
                Some(d.equipment_type),
                d.location_id,
                d.accessories,
            ),
        };

    ServiceOrder {
        id: Uuid::now_v7(),
        sector: scope.sector,
        os_number,
        client_name: payload.client.name,
        client_phone: Some(payload.client.phone),
        client_document: payload.client.document,
        client_email: payload.client.email,
        device_brand,
        device_model,
        device_serial,
        equipment_type,
        equipment_location_id: location,
        accessories,
        defect: payload.defect,
        value_cents: payload.value_cents,
        situation_id: payload.situation_id,
        withdrawal_situation_id: payload.withdrawal_situation_id,
        technician_id: payload.technician_id,
        receiver_id: payload.receiver_id,
        entry_date: payload.entry_date,
        service_date: payload.service_date,
        exit_date: payload.exit_date,
        part_order_date: payload.part_order_date,
        client_notified: payload.client_notified,
        part_arrival_notified: payload.part_arrival_notified,
        media_files: payload.media_files,
        created_at: now,
        updated_at: now,
    }
}

fn apply_patch(order: &mut ServiceOrder, patch: OrderPatch) {
    macro_rules! replace {
        ($($field:ident),* $(,)?) => {
            $(if let Some(v) = patch.$field {
                order.$field = v;
            })*
        };
    }

    replace!(
        os_number,
        client_name,
        defect,
        entry_date,
        client_notified,
        part_arrival_notified,
        media_files,
    );
    if patch.client_phone.is_some() {
        order.client_phone = patch.client_phone;
    }
    if patch.device_model.is_some() {
        order.device_model = patch.device_model;
    }
    if patch.equipment_type.is_some() {
        order.equipment_type = patch.equipment_type;
    }
    // Nullable columns: `Some(None)` clears.
    replace!(
        client_document,
        client_email,
        device_brand,
        device_serial,
        equipment_location_id,
        accessories,
        value_cents,
        situation_id,
        withdrawal_situation_id,
        technician_id,
        receiver_id,
        service_date,
        exit_date,
        part_order_date,
    );
    order.updated_at = Utc::now();
}

fn duplicate(os_number: i32) -> AppError {
    AppError::Conflict(format!("OS number {} already exists", os_number))
}

#[async_trait]
impl OrderNumberStore for MemoryOrderStore {
    async fn find_active_by_number(
        &self,
        scope: OrderScope,
        os_number: i32,
        exclude: Option<Uuid>,
    ) -> AppResult<Option<ExistingOrderSummary>> {
        Ok(self
            .lock()
            .holder(scope, os_number, exclude)
            .map(|s| s.order.summary()))
    }

    async fn next_number(&self, scope: OrderScope) -> AppResult<i32> {
        if self.oracle_down.load(Ordering::SeqCst) {
            return Err(AppError::Database("next_os_number unavailable".to_string()));
        }

        let mut inner = self.lock();
        let after_highest = inner.highest(scope).unwrap_or(0) + 1;
        let counter = inner
            .counters
            .entry((scope.owner_id, scope.sector.as_str()))
            .or_insert(0);
        *counter = (*counter + 1).max(after_highest);
        let mut candidate = *counter;

        // The counter can trail deleted-then-restored numbers; skip held ones.
        while inner.holder(scope, candidate, None).is_some() {
            candidate += 1;
        }
        inner
            .counters
            .insert((scope.owner_id, scope.sector.as_str()), candidate);
        Ok(candidate)
    }

    async fn highest_number(&self, scope: OrderScope) -> AppResult<Option<i32>> {
        Ok(self.lock().highest(scope))
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert_order(
        &self,
        scope: OrderScope,
        payload: NewOrderPayload,
    ) -> AppResult<ServiceOrder> {
        let os_number = payload
            .os_number
            .ok_or_else(|| AppError::InvalidInput("OS number was not assigned".to_string()))?;
        let stolen = self.take_stolen_insert();

        let mut inner = self.lock();
        if stolen && inner.holder(scope, os_number, None).is_none() {
            let mut rival = build_order(scope, payload.clone(), os_number);
            rival.client_name = "Concurrent order".to_string();
            inner.orders.push(StoredOrder {
                owner_id: scope.owner_id,
                deleted: false,
                order: rival,
            });
        }

        if inner.holder(scope, os_number, None).is_some() {
            return Err(duplicate(os_number));
        }

        let order = build_order(scope, payload, os_number);
        inner.orders.push(StoredOrder {
            owner_id: scope.owner_id,
            deleted: false,
            order: order.clone(),
        });
        Ok(order)
    }

    async fn update_order(
        &self,
        scope: OrderScope,
        id: Uuid,
        patch: OrderPatch,
    ) -> AppResult<ServiceOrder> {
        let mut inner = self.lock();

        if let Some(os_number) = patch.os_number
            && inner.holder(scope, os_number, Some(id)).is_some()
        {
            return Err(duplicate(os_number));
        }

        let stored = inner
            .orders
            .iter_mut()
            .find(|s| s.in_scope(scope) && s.order.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Order {}", id)))?;

        apply_patch(&mut stored.order, patch);
        Ok(stored.order.clone())
    }

    async fn set_media_files(
        &self,
        scope: OrderScope,
        id: Uuid,
        files: &[MediaFile],
    ) -> AppResult<()> {
        if self.media_writes_down.load(Ordering::SeqCst) {
            return Err(AppError::Database("Media list write failed".to_string()));
        }
        let mut inner = self.lock();
        if let Some(stored) = inner
            .orders
            .iter_mut()
            .find(|s| s.owner_id == scope.owner_id && s.order.id == id)
        {
            stored.order.media_files = files.to_vec();
            stored.order.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn soft_delete_order(&self, scope: OrderScope, id: Uuid) -> AppResult<()> {
        let mut inner = self.lock();
        let stored = inner
            .orders
            .iter_mut()
            .find(|s| s.in_scope(scope) && s.order.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Order {}", id)))?;
        stored.deleted = true;
        Ok(())
    }

    async fn get_order(&self, scope: OrderScope, id: Uuid) -> AppResult<Option<ServiceOrder>> {
        Ok(self
            .lock()
            .orders
            .iter()
            .find(|s| s.in_scope(scope) && s.order.id == id)
            .map(|s| s.order.clone()))
    }

    async fn list_orders(
        &self,
        scope: OrderScope,
        filters: &OrderFilters,
    ) -> AppResult<(Vec<ServiceOrder>, u64)> {
        let needle = filters.client_name.as_ref().map(|n| n.to_lowercase());
        let inner = self.lock();

        let mut matching: Vec<ServiceOrder> = inner
            .orders
            .iter()
            .filter(|s| s.in_scope(scope))
            .map(|s| &s.order)
            .filter(|o| filters.os_number.is_none_or(|n| o.os_number == n))
            .filter(|o| filters.situation_id.is_none_or(|id| o.situation_id == Some(id)))
            .filter(|o| filters.technician_id.is_none_or(|id| o.technician_id == Some(id)))
            .filter(|o| {
                needle
                    .as_ref()
                    .is_none_or(|n| o.client_name.to_lowercase().contains(n.as_str()))
            })
            .filter(|o| filters.entry_from.is_none_or(|from| o.entry_date >= from))
            .filter(|o| filters.entry_to.is_none_or(|to| o.entry_date <= to))
            .cloned()
            .collect();

        matching.sort_by(|a, b| b.os_number.cmp(&a.os_number));
        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(filters.offset as usize)
            .take(filters.clamped_limit() as usize)
            .collect();

        Ok((page, total))
    }

    async fn find_situation_by_name(&self, owner_id: Uuid, name: &str) -> AppResult<Option<Uuid>> {
        Ok(self
            .lock()
            .lookups
            .iter()
            .find(|(owner, kind, item)| {
                *owner == owner_id && *kind == LookupKind::Situation && item.name == name
            })
            .map(|(_, _, item)| item.id))
    }

    async fn list_lookups(&self, owner_id: Uuid, kind: LookupKind) -> AppResult<Vec<LookupItem>> {
        let mut items: Vec<LookupItem> = self
            .lock()
            .lookups
            .iter()
            .filter(|(owner, k, _)| *owner == owner_id && *k == kind)
            .map(|(_, _, item)| item.clone())
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }
}
