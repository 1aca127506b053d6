//! Service order domain models, payloads and validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::media::MediaFile;

/// Which intake desk an order belongs to. Each sector numbers its orders
/// independently per owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OrderSector {
    Phone,
    Computer,
}

impl OrderSector {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Phone => "phone",
            Self::Computer => "computer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "phone" => Some(Self::Phone),
            "computer" => Some(Self::Computer),
            _ => None,
        }
    }

    /// Table name exposed by the integration API.
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Phone => "phone_orders",
            Self::Computer => "computer_orders",
        }
    }

    pub fn from_table(table: &str) -> Option<Self> {
        match table {
            "phone_orders" => Some(Self::Phone),
            "computer_orders" => Some(Self::Computer),
            _ => None,
        }
    }

    /// Storage prefix for attachments of orders that do not exist yet.
    pub fn temp_prefix(&self) -> &'static str {
        match self {
            Self::Phone => "temp",
            Self::Computer => "computer/temp",
        }
    }

    /// Storage prefix for attachments of a saved order.
    pub fn order_prefix(&self, order_id: Uuid) -> String {
        match self {
            Self::Phone => order_id.to_string(),
            Self::Computer => format!("computer/{}", order_id),
        }
    }
}

impl std::fmt::Display for OrderSector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Owner and sector an OS number is unique within.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OrderScope {
    pub owner_id: Uuid,
    pub sector: OrderSector,
}

impl OrderScope {
    pub fn new(owner_id: Uuid, sector: OrderSector) -> Self {
        Self { owner_id, sector }
    }
}

/// Summary of the order already holding a number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ExistingOrderSummary {
    pub os_number: i32,
    pub client_name: String,
    pub device_label: String,
}

/// Validation failures for order payloads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Optional column in a partial update: absent leaves it alone, `null`
/// clears it, a value replaces it.
pub type Nullable<T> = Option<Option<T>>;

/// Deserialize a present field (including `null`) as `Some(..)`.
pub fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Some(Option::deserialize(deserializer)?))
}

/// Flat order fields as sent by forms and the integration API.
///
/// Clearable columns are [`Nullable`]; on create a `null` is the same as
/// leaving the field out.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct OrderFields {
    pub os_number: Option<i32>,
    pub client_name: Option<String>,
    pub client_phone: Option<String>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub client_document: Nullable<String>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub client_email: Nullable<String>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub device_brand: Nullable<String>,
    pub device_model: Option<String>,
    /// IMEI for phones, serial number for computers.
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub device_serial: Nullable<String>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub device_password: Nullable<String>,
    /// Computer only (notebook, desktop, printer...).
    pub equipment_type: Option<String>,
    /// Computer only.
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = Uuid)]
    pub equipment_location_id: Nullable<Uuid>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub accessories: Nullable<String>,
    pub defect: Option<String>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<i64>)]
    pub value_cents: Nullable<i64>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = Uuid)]
    pub situation_id: Nullable<Uuid>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = Uuid)]
    pub withdrawal_situation_id: Nullable<Uuid>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = Uuid)]
    pub technician_id: Nullable<Uuid>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = Uuid)]
    pub receiver_id: Nullable<Uuid>,
    pub entry_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub service_date: Nullable<DateTime<Utc>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub exit_date: Nullable<DateTime<Utc>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub part_order_date: Nullable<DateTime<Utc>>,
    pub client_notified: Option<bool>,
    pub part_arrival_notified: Option<bool>,
    pub media_files: Option<Vec<MediaFile>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientInfo {
    pub name: String,
    pub phone: String,
    pub document: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhoneDetails {
    pub brand: Option<String>,
    pub model: String,
    pub imei: Option<String>,
    pub unlock_code: Option<String>,
    pub accessories: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComputerDetails {
    pub equipment_type: String,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub serial: Option<String>,
    pub password: Option<String>,
    pub accessories: Option<String>,
    pub location_id: Option<Uuid>,
}

/// Sector-specific part of a new order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "sector", rename_all = "lowercase")]
pub enum OrderDetails {
    Phone(PhoneDetails),
    Computer(ComputerDetails),
}

impl OrderDetails {
    pub fn sector(&self) -> OrderSector {
        match self {
            Self::Phone(_) => OrderSector::Phone,
            Self::Computer(_) => OrderSector::Computer,
        }
    }
}

/// A validated new service order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewOrderPayload {
    /// Requested number; `None` lets the allocator pick one.
    pub os_number: Option<i32>,
    pub client: ClientInfo,
    pub details: OrderDetails,
    pub defect: String,
    pub value_cents: Option<i64>,
    pub situation_id: Option<Uuid>,
    pub withdrawal_situation_id: Option<Uuid>,
    pub technician_id: Option<Uuid>,
    pub receiver_id: Option<Uuid>,
    pub entry_date: DateTime<Utc>,
    pub service_date: Option<DateTime<Utc>>,
    pub exit_date: Option<DateTime<Utc>>,
    pub part_order_date: Option<DateTime<Utc>>,
    pub client_notified: bool,
    pub part_arrival_notified: bool,
    pub media_files: Vec<MediaFile>,
}

/// A validated partial update. `None` leaves a column untouched; for
/// nullable columns `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrderPatch {
    pub os_number: Option<i32>,
    pub client_name: Option<String>,
    pub client_phone: Option<String>,
    pub client_document: Nullable<String>,
    pub client_email: Nullable<String>,
    pub device_brand: Nullable<String>,
    pub device_model: Option<String>,
    pub device_serial: Nullable<String>,
    pub device_password: Nullable<String>,
    pub equipment_type: Option<String>,
    pub equipment_location_id: Nullable<Uuid>,
    pub accessories: Nullable<String>,
    pub defect: Option<String>,
    pub value_cents: Nullable<i64>,
    pub situation_id: Nullable<Uuid>,
    pub withdrawal_situation_id: Nullable<Uuid>,
    pub technician_id: Nullable<Uuid>,
    pub receiver_id: Nullable<Uuid>,
    pub entry_date: Option<DateTime<Utc>>,
    pub service_date: Nullable<DateTime<Utc>>,
    pub exit_date: Nullable<DateTime<Utc>>,
    pub part_order_date: Nullable<DateTime<Utc>>,
    pub client_notified: Option<bool>,
    pub part_arrival_notified: Option<bool>,
    pub media_files: Option<Vec<MediaFile>>,
}

/// Payloads the save loop can renumber on conflict.
pub trait OsNumbered {
    fn os_number(&self) -> Option<i32>;
    fn set_os_number(&mut self, number: i32);
}

impl OsNumbered for NewOrderPayload {
    fn os_number(&self) -> Option<i32> {
        self.os_number
    }

    fn set_os_number(&mut self, number: i32) {
        self.os_number = Some(number);
    }
}

impl OsNumbered for OrderPatch {
    fn os_number(&self) -> Option<i32> {
        self.os_number
    }

    fn set_os_number(&mut self, number: i32) {
        self.os_number = Some(number);
    }
}

/// Trim a string, mapping blank values to `None`.
fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// `clean` for a nullable patch field; a blank string clears the column.
fn clean_nullable(value: Nullable<String>) -> Nullable<String> {
    value.map(clean)
}

fn check_os_number(number: Option<i32>) -> Result<(), ValidationError> {
    match number {
        Some(n) if n <= 0 => Err(ValidationError::InvalidValue {
            field: "os_number",
            reason: "must be a positive integer".to_string(),
        }),
        _ => Ok(()),
    }
}

fn check_value(value: Option<i64>) -> Result<(), ValidationError> {
    match value {
        Some(v) if v < 0 => Err(ValidationError::InvalidValue {
            field: "value_cents",
            reason: "must not be negative".to_string(),
        }),
        _ => Ok(()),
    }
}

fn check_sector_fields(sector: OrderSector, fields: &OrderFields) -> Result<(), ValidationError> {
    if sector == OrderSector::Phone {
        if fields.equipment_type.is_some() {
            return Err(ValidationError::InvalidValue {
                field: "equipment_type",
                reason: "only applies to computer orders".to_string(),
            });
        }
        if fields.equipment_location_id.flatten().is_some() {
            return Err(ValidationError::InvalidValue {
                field: "equipment_location_id",
                reason: "only applies to computer orders".to_string(),
            });
        }
    }
    Ok(())
}

impl NewOrderPayload {
    /// Validate flat fields into a new order for `sector`.
    ///
    /// Every missing required field is reported at once.
    pub fn from_fields(sector: OrderSector, fields: OrderFields) -> Result<Self, ValidationError> {
        check_os_number(fields.os_number)?;
        check_value(fields.value_cents.flatten())?;
        check_sector_fields(sector, &fields)?;

        let client_name = clean(fields.client_name);
        let client_phone = clean(fields.client_phone);
        let defect = clean(fields.defect);
        let device_model = clean(fields.device_model);
        let equipment_type = clean(fields.equipment_type);

        let mut missing = Vec::new();
        if client_name.is_none() {
            missing.push("client_name");
        }
        if client_phone.is_none() {
            missing.push("client_phone");
        }
        match sector {
            OrderSector::Phone if device_model.is_none() => missing.push("device_model"),
            OrderSector::Computer if equipment_type.is_none() => missing.push("equipment_type"),
            _ => {}
        }
        if defect.is_none() {
            missing.push("defect");
        }

        let (Some(client_name), Some(client_phone), Some(defect)) =
            (client_name, client_phone, defect)
        else {
            return Err(ValidationError::MissingFields(missing));
        };
        if !missing.is_empty() {
            return Err(ValidationError::MissingFields(missing));
        }

        let details = match sector {
            OrderSector::Phone => OrderDetails::Phone(PhoneDetails {
                brand: clean(fields.device_brand.flatten()),
                model: device_model.unwrap_or_default(),
                imei: clean(fields.device_serial.flatten()),
                unlock_code: clean(fields.device_password.flatten()),
                accessories: clean(fields.accessories.flatten()),
            }),
            OrderSector::Computer => OrderDetails::Computer(ComputerDetails {
                equipment_type: equipment_type.unwrap_or_default(),
                brand: clean(fields.device_brand.flatten()),
                model: device_model,
                serial: clean(fields.device_serial.flatten()),
                password: clean(fields.device_password.flatten()),
                accessories: clean(fields.accessories.flatten()),
                location_id: fields.equipment_location_id.flatten(),
            }),
        };

        Ok(NewOrderPayload {
            os_number: fields.os_number,
            client: ClientInfo {
                name: client_name,
                phone: client_phone,
                document: clean(fields.client_document.flatten()),
                email: clean(fields.client_email.flatten()),
            },
            details,
            defect,
            value_cents: fields.value_cents.flatten(),
            situation_id: fields.situation_id.flatten(),
            withdrawal_situation_id: fields.withdrawal_situation_id.flatten(),
            technician_id: fields.technician_id.flatten(),
            receiver_id: fields.receiver_id.flatten(),
            entry_date: fields.entry_date.unwrap_or_else(Utc::now),
            service_date: fields.service_date.flatten(),
            exit_date: fields.exit_date.flatten(),
            part_order_date: fields.part_order_date.flatten(),
            client_notified: fields.client_notified.unwrap_or(false),
            part_arrival_notified: fields.part_arrival_notified.unwrap_or(false),
            media_files: fields.media_files.unwrap_or_default(),
        })
    }

    pub fn sector(&self) -> OrderSector {
        self.details.sector()
    }
}

impl OrderPatch {
    /// Validate flat fields into a patch. Required fields may be omitted but
    /// never blanked.
    pub fn from_fields(sector: OrderSector, fields: OrderFields) -> Result<Self, ValidationError> {
        check_os_number(fields.os_number)?;
        check_value(fields.value_cents.flatten())?;
        check_sector_fields(sector, &fields)?;

        let required_blank = |name: &'static str, value: &Option<String>| {
            matches!(value, Some(s) if s.trim().is_empty()).then_some(name)
        };

        let mut blank: Vec<&'static str> = [
            required_blank("client_name", &fields.client_name),
            required_blank("client_phone", &fields.client_phone),
            required_blank("defect", &fields.defect),
        ]
        .into_iter()
        .flatten()
        .collect();
        match sector {
            OrderSector::Phone => blank.extend(required_blank("device_model", &fields.device_model)),
            OrderSector::Computer => {
                blank.extend(required_blank("equipment_type", &fields.equipment_type))
            }
        }
        if !blank.is_empty() {
            return Err(ValidationError::MissingFields(blank));
        }

        Ok(OrderPatch {
            os_number: fields.os_number,
            client_name: clean(fields.client_name),
            client_phone: clean(fields.client_phone),
            client_document: clean_nullable(fields.client_document),
            client_email: clean_nullable(fields.client_email),
            device_brand: clean_nullable(fields.device_brand),
            device_model: clean(fields.device_model),
            device_serial: clean_nullable(fields.device_serial),
            device_password: clean_nullable(fields.device_password),
            equipment_type: clean(fields.equipment_type),
            equipment_location_id: fields.equipment_location_id,
            accessories: clean_nullable(fields.accessories),
            defect: clean(fields.defect),
            value_cents: fields.value_cents,
            situation_id: fields.situation_id,
            withdrawal_situation_id: fields.withdrawal_situation_id,
            technician_id: fields.technician_id,
            receiver_id: fields.receiver_id,
            entry_date: fields.entry_date,
            service_date: fields.service_date,
            exit_date: fields.exit_date,
            part_order_date: fields.part_order_date,
            client_notified: fields.client_notified,
            part_arrival_notified: fields.part_arrival_notified,
            media_files: fields.media_files,
        })
    }

    pub fn is_empty(&self) -> bool {
        self == &OrderPatch::default()
    }
}

/// Service order as returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceOrder {
    pub id: Uuid,
    pub sector: OrderSector,
    pub os_number: i32,
    pub client_name: String,
    pub client_phone: Option<String>,
    pub client_document: Option<String>,
    pub client_email: Option<String>,
    pub device_brand: Option<String>,
    pub device_model: Option<String>,
    pub device_serial: Option<String>,
    pub equipment_type: Option<String>,
    pub equipment_location_id: Option<Uuid>,
    pub accessories: Option<String>,
    pub defect: String,
    pub value_cents: Option<i64>,
    pub situation_id: Option<Uuid>,
    pub withdrawal_situation_id: Option<Uuid>,
    pub technician_id: Option<Uuid>,
    pub receiver_id: Option<Uuid>,
    pub entry_date: DateTime<Utc>,
    pub service_date: Option<DateTime<Utc>>,
    pub exit_date: Option<DateTime<Utc>>,
    pub part_order_date: Option<DateTime<Utc>>,
    pub client_notified: bool,
    pub part_arrival_notified: bool,
    pub media_files: Vec<MediaFile>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceOrder {
    /// Short label describing the device or equipment.
    pub fn device_label(&self) -> String {
        device_label(
            self.equipment_type.as_deref(),
            self.device_brand.as_deref(),
            self.device_model.as_deref(),
        )
    }

    pub fn summary(&self) -> ExistingOrderSummary {
        ExistingOrderSummary {
            os_number: self.os_number,
            client_name: self.client_name.clone(),
            device_label: self.device_label(),
        }
    }
}

/// Join the non-empty parts of a device description.
pub fn device_label(equipment: Option<&str>, brand: Option<&str>, model: Option<&str>) -> String {
    [equipment, brand, model]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Filters for listing orders.
#[derive(Debug, Clone, Default, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OrderFilters {
    pub os_number: Option<i32>,
    /// Case-insensitive substring match on the client name.
    pub client_name: Option<String>,
    pub situation_id: Option<Uuid>,
    pub technician_id: Option<Uuid>,
    pub entry_from: Option<DateTime<Utc>>,
    pub entry_to: Option<DateTime<Utc>>,
    #[serde(default = "default_limit")]
    pub limit: u64,
    #[serde(default)]
    pub offset: u64,
}

fn default_limit() -> u64 {
    50
}

impl OrderFilters {
    pub fn clamped_limit(&self) -> u64 {
        self.limit.clamp(1, 200)
    }
}
