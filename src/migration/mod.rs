//! SeaORM database migrations.

pub use sea_orm_migration::prelude::*;

mod m20260301_000001_create_lookups;
mod m20260301_000002_create_service_orders;
mod m20260301_000003_create_os_number_oracle;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260301_000001_create_lookups::Migration),
            Box::new(m20260301_000002_create_service_orders::Migration),
            Box::new(m20260301_000003_create_os_number_oracle::Migration),
        ]
    }
}
