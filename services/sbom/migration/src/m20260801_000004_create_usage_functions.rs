use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

/// Reference implementation of the usage-accounting contract
/// (`check_and_consume_usage` / `revert_usage`) over a per-period counter
/// table. Production deployments that manage these functions elsewhere can
/// skip this migration; the service only depends on the function signatures.
#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();

        db.execute_unprepared(
            r#"
            CREATE TABLE IF NOT EXISTS organization_usage (
                organization_id BIGINT NOT NULL,
                resource TEXT NOT NULL,
                period_start TIMESTAMPTZ NOT NULL DEFAULT date_trunc('month', now()),
                used BIGINT NOT NULL DEFAULT 0,
                limit_amount BIGINT NOT NULL DEFAULT 100,
                PRIMARY KEY (organization_id, resource, period_start)
            )
            "#,
        )
        .await?;

        db.execute_unprepared(
            r#"
            CREATE OR REPLACE FUNCTION check_and_consume_usage(
                p_org_id BIGINT,
                p_resource TEXT,
                p_amount BIGINT
            ) RETURNS TABLE (allowed BOOLEAN, message TEXT, next_reset TIMESTAMPTZ)
            LANGUAGE plpgsql AS $$
            DECLARE
                v_period TIMESTAMPTZ := date_trunc('month', now());
                v_row organization_usage%ROWTYPE;
            BEGIN
                INSERT INTO organization_usage (organization_id, resource, period_start)
                VALUES (p_org_id, p_resource, v_period)
                ON CONFLICT (organization_id, resource, period_start) DO NOTHING;

                SELECT * INTO v_row
                FROM organization_usage
                WHERE organization_id = p_org_id
                  AND resource = p_resource
                  AND period_start = v_period
                FOR UPDATE;

                IF v_row.used + p_amount > v_row.limit_amount THEN
                    RETURN QUERY SELECT
                        FALSE,
                        format('%s limit reached (%s of %s used)',
                               p_resource, v_row.used, v_row.limit_amount),
                        v_period + interval '1 month';
                    RETURN;
                END IF;

                UPDATE organization_usage
                SET used = used + p_amount
                WHERE organization_id = p_org_id
                  AND resource = p_resource
                  AND period_start = v_period;

                RETURN QUERY SELECT TRUE, ''::TEXT, v_period + interval '1 month';
            END;
            $$
            "#,
        )
        .await?;

        db.execute_unprepared(
            r#"
            CREATE OR REPLACE FUNCTION revert_usage(
                p_org_id BIGINT,
                p_resource TEXT,
                p_amount BIGINT
            ) RETURNS VOID
            LANGUAGE plpgsql AS $$
            DECLARE
                v_period TIMESTAMPTZ := date_trunc('month', now());
            BEGIN
                UPDATE organization_usage
                SET used = GREATEST(used - p_amount, 0)
                WHERE organization_id = p_org_id
                  AND resource = p_resource
                  AND period_start = v_period;
            END;
            $$
            "#,
        )
        .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared("DROP FUNCTION IF EXISTS check_and_consume_usage(BIGINT, TEXT, BIGINT)")
            .await?;
        db.execute_unprepared("DROP FUNCTION IF EXISTS revert_usage(BIGINT, TEXT, BIGINT)")
            .await?;
        db.execute_unprepared("DROP TABLE IF EXISTS organization_usage")
            .await?;
        Ok(())
    }
}
