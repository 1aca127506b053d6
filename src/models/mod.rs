//! Domain models for the repair desk server.

pub mod lookup;
pub mod media;
pub mod order;

pub use lookup::{LookupItem, LookupKind};
pub use media::{MediaFile, MediaKind, merge_by_path};
pub use order::{
    ClientInfo, ComputerDetails, ExistingOrderSummary, NewOrderPayload, OrderDetails,
    Nullable, OrderFields, OrderFilters, OrderPatch, OrderScope, OrderSector, OsNumbered,
    PhoneDetails, ServiceOrder, ValidationError, device_label,
};
