//! Database queries for lookup tables (situations, employees, ...).

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use tracing::info;
use uuid::Uuid;

use crate::entity::{employee, equipment_location, situation, withdrawal_situation};
use crate::error::{AppError, AppResult};
use crate::models::{LookupItem, LookupKind};

use super::DbPool;

/// All four lookup entities share the same columns.
macro_rules! list_lookup {
    ($conn:expr, $entity:ident, $owner:expr) => {
        $entity::Entity::find()
            .filter($entity::Column::OwnerId.eq($owner))
            .filter($entity::Column::Deleted.eq(false))
            .order_by_asc($entity::Column::Name)
            .all($conn)
            .await
            .map(|rows| {
                rows.into_iter()
                    .map(|m| LookupItem {
                        id: m.id,
                        name: m.name,
                        color: m.color,
                    })
                    .collect::<Vec<_>>()
            })
    };
}

impl DbPool {
    pub(super) async fn lookup_items(
        &self,
        owner_id: Uuid,
        kind: LookupKind,
    ) -> AppResult<Vec<LookupItem>> {
        let conn = self.connection();
        let items = match kind {
            LookupKind::Situation => list_lookup!(conn, situation, owner_id),
            LookupKind::WithdrawalSituation => list_lookup!(conn, withdrawal_situation, owner_id),
            LookupKind::Employee => list_lookup!(conn, employee, owner_id),
            LookupKind::EquipmentLocation => list_lookup!(conn, equipment_location, owner_id),
        };

        items.map_err(|e| AppError::Database(format!("Failed to list {} rows: {}", kind.as_str(), e)))
    }

    pub(super) async fn situation_id_by_name(
        &self,
        owner_id: Uuid,
        name: &str,
    ) -> AppResult<Option<Uuid>> {
        let found = situation::Entity::find()
            .filter(situation::Column::OwnerId.eq(owner_id))
            .filter(situation::Column::Name.eq(name))
            .filter(situation::Column::Deleted.eq(false))
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to find situation: {}", e)))?;

        Ok(found.map(|m| m.id))
    }

    /// Make sure the default situation exists for `owner_id`, creating it if needed.
    pub async fn ensure_situation(&self, owner_id: Uuid, name: &str) -> AppResult<Uuid> {
        if let Some(id) = self.situation_id_by_name(owner_id, name).await? {
            return Ok(id);
        }

        let model = situation::ActiveModel {
            id: Set(Uuid::now_v7()),
            owner_id: Set(owner_id),
            name: Set(name.to_string()),
            color: Set(None),
            deleted: Set(false),
            created_at: Set(Utc::now()),
        };

        let created = model
            .insert(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to create situation: {}", e)))?;

        info!("Created default situation '{}'", name);
        Ok(created.id)
    }
}
