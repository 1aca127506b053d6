//! Reference data referenced by service orders.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Lookup tables exposed read-only through the APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    Situation,
    WithdrawalSituation,
    Employee,
    EquipmentLocation,
}

impl LookupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Situation => "situation",
            Self::WithdrawalSituation => "withdrawal_situation",
            Self::Employee => "employee",
            Self::EquipmentLocation => "equipment_location",
        }
    }
}

/// A situation, withdrawal situation, employee or equipment location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LookupItem {
    pub id: Uuid,
    pub name: String,
    /// Display color (hex), when the table carries one.
    pub color: Option<String>,
}
