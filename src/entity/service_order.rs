//! Service order entity for SeaORM.

use sea_orm::entity::prelude::*;
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "service_orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub owner_id: Uuid,
    /// 'phone' or 'computer'
    pub sector: String,
    pub os_number: i32,
    pub client_name: String,
    pub client_phone: Option<String>,
    pub client_document: Option<String>,
    pub client_email: Option<String>,
    pub device_brand: Option<String>,
    pub device_model: Option<String>,
    pub device_serial: Option<String>,
    pub device_password: Option<String>,
    pub equipment_type: Option<String>,
    pub equipment_location_id: Option<Uuid>,
    pub accessories: Option<String>,
    pub defect: String,
    pub value_cents: Option<i64>,
    pub situation_id: Option<Uuid>,
    pub withdrawal_situation_id: Option<Uuid>,
    pub technician_id: Option<Uuid>,
    pub receiver_id: Option<Uuid>,
    pub entry_date: DateTimeUtc,
    pub service_date: Option<DateTimeUtc>,
    pub exit_date: Option<DateTimeUtc>,
    pub part_order_date: Option<DateTimeUtc>,
    pub client_notified: bool,
    pub part_arrival_notified: bool,
    #[sea_orm(column_type = "JsonBinary")]
    pub media_files: JsonValue,
    pub deleted: bool,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::situation::Entity",
        from = "Column::SituationId",
        to = "super::situation::Column::Id"
    )]
    Situation,
    #[sea_orm(
        belongs_to = "super::employee::Entity",
        from = "Column::TechnicianId",
        to = "super::employee::Column::Id"
    )]
    Technician,
}

impl Related<super::situation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Situation.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
