//! Migration: Create lookup tables and the shared updated_at trigger function.
//!
//! Situations, withdrawal situations, employees and equipment locations are
//! simple per-owner lists referenced by service orders.

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
                -- Shared trigger function for updated_at
                CREATE OR REPLACE FUNCTION update_updated_at_column()
                RETURNS TRIGGER AS $$
                BEGIN
                    NEW.updated_at = NOW();
                    RETURN NEW;
                END;
                $$ LANGUAGE plpgsql;

                CREATE TABLE situations (
                    id UUID PRIMARY KEY,
                    owner_id UUID NOT NULL,
                    name VARCHAR(100) NOT NULL,
                    color VARCHAR(20),
                    deleted BOOLEAN NOT NULL DEFAULT FALSE,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );
                CREATE INDEX idx_situations_owner ON situations(owner_id, name)
                    WHERE deleted = FALSE;

                CREATE TABLE withdrawal_situations (
                    id UUID PRIMARY KEY,
                    owner_id UUID NOT NULL,
                    name VARCHAR(100) NOT NULL,
                    color VARCHAR(20),
                    deleted BOOLEAN NOT NULL DEFAULT FALSE,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );
                CREATE INDEX idx_withdrawal_situations_owner ON withdrawal_situations(owner_id, name)
                    WHERE deleted = FALSE;

                CREATE TABLE employees (
                    id UUID PRIMARY KEY,
                    owner_id UUID NOT NULL,
                    name VARCHAR(100) NOT NULL,
                    color VARCHAR(20),
                    deleted BOOLEAN NOT NULL DEFAULT FALSE,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );
                CREATE INDEX idx_employees_owner ON employees(owner_id, name)
                    WHERE deleted = FALSE;

                CREATE TABLE equipment_locations (
                    id UUID PRIMARY KEY,
                    owner_id UUID NOT NULL,
                    name VARCHAR(100) NOT NULL,
                    color VARCHAR(20),
                    deleted BOOLEAN NOT NULL DEFAULT FALSE,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );
                CREATE INDEX idx_equipment_locations_owner ON equipment_locations(owner_id, name)
                    WHERE deleted = FALSE;
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
                DROP TABLE IF EXISTS equipment_locations CASCADE;
                DROP TABLE IF EXISTS employees CASCADE;
                DROP TABLE IF EXISTS withdrawal_situations CASCADE;
                DROP TABLE IF EXISTS situations CASCADE;
                DROP FUNCTION IF EXISTS update_updated_at_column();
                "#,
            )
            .await?;

        Ok(())
    }
}
