//! Migration: Create the OS number counter and `next_os_number` function.
//!
//! The function hands out numbers per (owner, sector) atomically and never
//! returns a number held by a non-deleted order: the counter is bumped past
//! the current maximum whenever rows were inserted with explicit numbers.

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
                CREATE TABLE os_number_counter (
                    owner_id UUID NOT NULL,
                    sector VARCHAR(16) NOT NULL
                        CHECK (sector IN ('phone', 'computer')),
                    last_value INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (owner_id, sector)
                );

                CREATE OR REPLACE FUNCTION next_os_number(p_owner UUID, p_sector VARCHAR)
                RETURNS INTEGER AS $$
                DECLARE
                    current_max INTEGER;
                    next_value INTEGER;
                BEGIN
                    SELECT COALESCE(MAX(os_number), 0) INTO current_max
                    FROM service_orders
                    WHERE owner_id = p_owner AND sector = p_sector AND deleted = FALSE;

                    INSERT INTO os_number_counter (owner_id, sector, last_value)
                    VALUES (p_owner, p_sector, current_max + 1)
                    ON CONFLICT (owner_id, sector) DO UPDATE
                        SET last_value = GREATEST(os_number_counter.last_value + 1, current_max + 1)
                    RETURNING last_value INTO next_value;

                    RETURN next_value;
                END;
                $$ LANGUAGE plpgsql;
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
                DROP FUNCTION IF EXISTS next_os_number(UUID, VARCHAR);
                DROP TABLE IF EXISTS os_number_counter;
                "#,
            )
            .await?;

        Ok(())
    }
}
