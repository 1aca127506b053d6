//! Migration: Create service_orders table.
//!
//! Phone and computer orders share one table, split by `sector`. OS numbers
//! are unique per owner and sector among non-deleted orders; the partial
//! unique index is what save retries rely on.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                CREATE TABLE service_orders (
                    id UUID PRIMARY KEY,
                    owner_id UUID NOT NULL,
                    sector VARCHAR(16) NOT NULL
                        CHECK (sector IN ('phone', 'computer')),
                    os_number INTEGER NOT NULL CHECK (os_number > 0),

                    client_name VARCHAR(255) NOT NULL,
                    client_phone VARCHAR(50),
                    client_document VARCHAR(50),
                    client_email VARCHAR(255),

                    device_brand VARCHAR(100),
                    device_model VARCHAR(100),
                    device_serial VARCHAR(100),
                    device_password VARCHAR(100),
                    equipment_type VARCHAR(100),
                    equipment_location_id UUID REFERENCES equipment_locations(id),
                    accessories TEXT,

                    defect TEXT NOT NULL,
                    value_cents BIGINT CHECK (value_cents IS NULL OR value_cents >= 0),

                    situation_id UUID REFERENCES situations(id),
                    withdrawal_situation_id UUID REFERENCES withdrawal_situations(id),
                    technician_id UUID REFERENCES employees(id),
                    receiver_id UUID REFERENCES employees(id),

                    entry_date TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    service_date TIMESTAMPTZ,
                    exit_date TIMESTAMPTZ,
                    part_order_date TIMESTAMPTZ,

                    client_notified BOOLEAN NOT NULL DEFAULT FALSE,
                    part_arrival_notified BOOLEAN NOT NULL DEFAULT FALSE,

                    -- [{url, path, type, name}]
                    media_files JSONB NOT NULL DEFAULT '[]'::jsonb,

                    deleted BOOLEAN NOT NULL DEFAULT FALSE,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );

                CREATE UNIQUE INDEX idx_service_orders_os_number
                    ON service_orders(owner_id, sector, os_number)
                    WHERE deleted = FALSE;

                CREATE INDEX idx_service_orders_entry_date
                    ON service_orders(owner_id, sector, entry_date DESC)
                    WHERE deleted = FALSE;

                CREATE INDEX idx_service_orders_situation ON service_orders(situation_id)
                    WHERE deleted = FALSE;

                CREATE INDEX idx_service_orders_technician ON service_orders(technician_id)
                    WHERE deleted = FALSE;

                CREATE TRIGGER update_service_orders_updated_at
                    BEFORE UPDATE ON service_orders
                    FOR EACH ROW
                    EXECUTE FUNCTION update_updated_at_column();
                "#,
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                DROP TRIGGER IF EXISTS update_service_orders_updated_at ON service_orders;
                DROP TABLE IF EXISTS service_orders CASCADE;
                "#,
            )
            .await?;

        Ok(())
    }
}
