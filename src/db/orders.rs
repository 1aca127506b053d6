//! Database queries for service orders.

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbBackend, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Select, Set, Statement,
};
use uuid::Uuid;

use crate::entity::service_order::{self as order, ActiveModel, Entity as ServiceOrderEntity};
use crate::error::{AppError, AppResult};
use crate::models::{
    ExistingOrderSummary, LookupItem, LookupKind, MediaFile, NewOrderPayload, OrderDetails,
    OrderFilters, OrderPatch, OrderScope, OrderSector, ServiceOrder, device_label,
};
use crate::services::orders::OrderStore;
use crate::services::os_number::OrderNumberStore;

use super::{DbPool, write_error};

impl From<order::Model> for ServiceOrder {
    fn from(model: order::Model) -> Self {
        let sector = OrderSector::parse(&model.sector).unwrap_or(OrderSector::Phone);
        ServiceOrder {
            id: model.id,
            sector,
            os_number: model.os_number,
            client_name: model.client_name,
            client_phone: model.client_phone,
            client_document: model.client_document,
            client_email: model.client_email,
            device_brand: model.device_brand,
            device_model: model.device_model,
            device_serial: model.device_serial,
            equipment_type: model.equipment_type,
            equipment_location_id: model.equipment_location_id,
            accessories: model.accessories,
            defect: model.defect,
            value_cents: model.value_cents,
            situation_id: model.situation_id,
            withdrawal_situation_id: model.withdrawal_situation_id,
            technician_id: model.technician_id,
            receiver_id: model.receiver_id,
            entry_date: model.entry_date,
            service_date: model.service_date,
            exit_date: model.exit_date,
            part_order_date: model.part_order_date,
            client_notified: model.client_notified,
            part_arrival_notified: model.part_arrival_notified,
            media_files: MediaFile::list_from_json(Some(&model.media_files)),
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Non-deleted orders of one owner and sector.
fn scoped(scope: OrderScope) -> Select<ServiceOrderEntity> {
    ServiceOrderEntity::find()
        .filter(order::Column::OwnerId.eq(scope.owner_id))
        .filter(order::Column::Sector.eq(scope.sector.as_str()))
        .filter(order::Column::Deleted.eq(false))
}

/// Escape `%`, `_` and `\` for use inside an ILIKE pattern.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl DbPool {
    async fn find_order_model(&self, scope: OrderScope, id: Uuid) -> AppResult<Option<order::Model>> {
        scoped(scope)
            .filter(order::Column::Id.eq(id))
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get order: {}", e)))
    }
}

#[async_trait]
impl OrderNumberStore for DbPool {
    async fn find_active_by_number(
        &self,
        scope: OrderScope,
        os_number: i32,
        exclude: Option<Uuid>,
    ) -> AppResult<Option<ExistingOrderSummary>> {
        let mut select = scoped(scope).filter(order::Column::OsNumber.eq(os_number));
        if let Some(id) = exclude {
            select = select.filter(order::Column::Id.ne(id));
        }

        let existing = select
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to check OS number: {}", e)))?;

        Ok(existing.map(|m| ExistingOrderSummary {
            os_number: m.os_number,
            device_label: device_label(
                m.equipment_type.as_deref(),
                m.device_brand.as_deref(),
                m.device_model.as_deref(),
            ),
            client_name: m.client_name,
        }))
    }

    async fn next_number(&self, scope: OrderScope) -> AppResult<i32> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT next_os_number($1, $2) AS next",
            [scope.owner_id.into(), scope.sector.as_str().into()],
        );

        let row = self
            .connection()
            .query_one_raw(stmt)
            .await
            .map_err(|e| AppError::Database(format!("next_os_number failed: {}", e)))?
            .ok_or_else(|| AppError::Database("next_os_number returned no row".to_string()))?;

        row.try_get::<i32>("", "next")
            .map_err(|e| AppError::Database(format!("Invalid next_os_number result: {}", e)))
    }

    async fn highest_number(&self, scope: OrderScope) -> AppResult<Option<i32>> {
        let highest = scoped(scope)
            .select_only()
            .column_as(order::Column::OsNumber.max(), "highest")
            .into_tuple::<Option<i32>>()
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to read highest OS number: {}", e)))?;

        Ok(highest.flatten())
    }
}

#[async_trait]
impl OrderStore for DbPool {
    async fn insert_order(
        &self,
        scope: OrderScope,
        payload: NewOrderPayload,
    ) -> AppResult<ServiceOrder> {
        let now = Utc::now();
        let os_number = payload
            .os_number
            .ok_or_else(|| AppError::InvalidInput("OS number was not assigned".to_string()))?;

        let (device_brand, device_model, device_serial, device_password, equipment_type, location, accessories) =
            match payload.details {
                OrderDetails::Phone(d) => (d.brand, Some(d.model), d.imei, d.unlock_code, None, None, d.accessories),
                OrderDetails::Computer(d) => (
                    d.brand,
                    d.model,
                    d.serial,
                    d.password,
                    Some(d.equipment_type),
                    d.location_id,
                    d.accessories,
                ),
            };

        let model = ActiveModel {
            id: Set(Uuid::now_v7()),
            owner_id: Set(scope.owner_id),
            sector: Set(scope.sector.as_str().to_string()),
            os_number: Set(os_number),
            client_name: Set(payload.client.name),
            client_phone: Set(Some(payload.client.phone)),
            client_document: Set(payload.client.document),
            client_email: Set(payload.client.email),
            device_brand: Set(device_brand),
            device_model: Set(device_model),
            device_serial: Set(device_serial),
            device_password: Set(device_password),
            equipment_type: Set(equipment_type),
            equipment_location_id: Set(location),
            accessories: Set(accessories),
            defect: Set(payload.defect),
            value_cents: Set(payload.value_cents),
            situation_id: Set(payload.situation_id),
            withdrawal_situation_id: Set(payload.withdrawal_situation_id),
            technician_id: Set(payload.technician_id),
            receiver_id: Set(payload.receiver_id),
            entry_date: Set(payload.entry_date),
            service_date: Set(payload.service_date),
            exit_date: Set(payload.exit_date),
            part_order_date: Set(payload.part_order_date),
            client_notified: Set(payload.client_notified),
            part_arrival_notified: Set(payload.part_arrival_notified),
            media_files: Set(MediaFile::list_to_json(&payload.media_files)),
            deleted: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let result = model
            .insert(self.connection())
            .await
            .map_err(|e| write_error("Failed to insert order", e))?;

        Ok(result.into())
    }

    async fn update_order(
        &self,
        scope: OrderScope,
        id: Uuid,
        patch: OrderPatch,
    ) -> AppResult<ServiceOrder> {
        let existing = self
            .find_order_model(scope, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {}", id)))?;

        let mut active: ActiveModel = existing.into();

        if let Some(v) = patch.os_number {
            active.os_number = Set(v);
        }
        if let Some(v) = patch.client_name {
            active.client_name = Set(v);
        }
        if let Some(v) = patch.defect {
            active.defect = Set(v);
        }
        if let Some(v) = patch.client_notified {
            active.client_notified = Set(v);
        }
        if let Some(v) = patch.part_arrival_notified {
            active.part_arrival_notified = Set(v);
        }
        if let Some(v) = patch.entry_date {
            active.entry_date = Set(v);
        }
        if let Some(files) = patch.media_files {
            active.media_files = Set(MediaFile::list_to_json(&files));
        }

        if patch.client_phone.is_some() {
            active.client_phone = Set(patch.client_phone);
        }
        if patch.device_model.is_some() {
            active.device_model = Set(patch.device_model);
        }
        if patch.equipment_type.is_some() {
            active.equipment_type = Set(patch.equipment_type);
        }

        // Nullable columns: `Some(None)` writes NULL.
        macro_rules! set_nullable {
            ($($field:ident),* $(,)?) => {
                $(if let Some(v) = patch.$field {
                    active.$field = Set(v);
                })*
            };
        }
        set_nullable!(
            client_document,
            client_email,
            device_brand,
            device_serial,
            device_password,
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

        active.updated_at = Set(Utc::now());

        let result = active
            .update(self.connection())
            .await
            .map_err(|e| write_error("Failed to update order", e))?;

        Ok(result.into())
    }

    async fn set_media_files(
        &self,
        scope: OrderScope,
        id: Uuid,
        files: &[MediaFile],
    ) -> AppResult<()> {
        ServiceOrderEntity::update_many()
            .col_expr(
                order::Column::MediaFiles,
                Expr::value(MediaFile::list_to_json(files)),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(id))
            .filter(order::Column::OwnerId.eq(scope.owner_id))
            .exec(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to update media files: {}", e)))?;

        Ok(())
    }

    async fn soft_delete_order(&self, scope: OrderScope, id: Uuid) -> AppResult<()> {
        let result = ServiceOrderEntity::update_many()
            .col_expr(order::Column::Deleted, Expr::value(true))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(id))
            .filter(order::Column::OwnerId.eq(scope.owner_id))
            .filter(order::Column::Sector.eq(scope.sector.as_str()))
            .filter(order::Column::Deleted.eq(false))
            .exec(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to delete order: {}", e)))?;

        if result.rows_affected == 0 {
            return Err(AppError::NotFound(format!("Order {}", id)));
        }
        Ok(())
    }

    async fn get_order(&self, scope: OrderScope, id: Uuid) -> AppResult<Option<ServiceOrder>> {
        Ok(self.find_order_model(scope, id).await?.map(Into::into))
    }

    async fn list_orders(
        &self,
        scope: OrderScope,
        filters: &OrderFilters,
    ) -> AppResult<(Vec<ServiceOrder>, u64)> {
        let mut select = scoped(scope);

        if let Some(os_number) = filters.os_number {
            select = select.filter(order::Column::OsNumber.eq(os_number));
        }
        if let Some(situation_id) = filters.situation_id {
            select = select.filter(order::Column::SituationId.eq(situation_id));
        }
        if let Some(technician_id) = filters.technician_id {
            select = select.filter(order::Column::TechnicianId.eq(technician_id));
        }
        if let Some(ref name) = filters.client_name {
            select = select.filter(Expr::cust_with_values(
                "client_name ILIKE $1",
                [format!("%{}%", escape_like(name))],
            ));
        }
        if let Some(from) = filters.entry_from {
            select = select.filter(order::Column::EntryDate.gte(from));
        }
        if let Some(to) = filters.entry_to {
            select = select.filter(order::Column::EntryDate.lte(to));
        }

        let total = select
            .clone()
            .count(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to count orders: {}", e)))?;

        let models = select
            .order_by_desc(order::Column::OsNumber)
            .offset(filters.offset)
            .limit(filters.clamped_limit())
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to list orders: {}", e)))?;

        Ok((models.into_iter().map(Into::into).collect(), total))
    }

    async fn find_situation_by_name(&self, owner_id: Uuid, name: &str) -> AppResult<Option<Uuid>> {
        self.situation_id_by_name(owner_id, name).await
    }

    async fn list_lookups(&self, owner_id: Uuid, kind: LookupKind) -> AppResult<Vec<LookupItem>> {
        self.lookup_items(owner_id, kind).await
    }
}
