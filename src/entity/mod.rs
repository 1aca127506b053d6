//! SeaORM entity definitions for PostgreSQL database.

pub mod employee;
pub mod equipment_location;
pub mod service_order;
pub mod situation;
pub mod withdrawal_situation;
