//! Schema bootstrap for the tables the engine owns
//!
//! `users` and `goods` rows are managed by external admin paths; the
//! DDL here only guarantees the engine's own tables (and the minimal
//! `goods` shape it joins against) exist on a fresh database.

use sqlx::PgPool;

const DDL: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS goods (
        id              BIGINT PRIMARY KEY,
        name            TEXT NOT NULL,
        price_cents     BIGINT NOT NULL,
        status          SMALLINT NOT NULL DEFAULT 1
    )"#,
    r#"CREATE TABLE IF NOT EXISTS seckill_activities (
        id              BIGSERIAL PRIMARY KEY,
        goods_id        BIGINT NOT NULL,
        unit_price      BIGINT NOT NULL,
        total_stock     BIGINT NOT NULL,
        sold_count      BIGINT NOT NULL DEFAULT 0,
        start_at        TIMESTAMPTZ NOT NULL,
        end_at          TIMESTAMPTZ NOT NULL,
        limit_per_user  BIGINT NOT NULL DEFAULT 1,
        status          SMALLINT NOT NULL DEFAULT 0,
        gray_ratio      DOUBLE PRECISION NOT NULL DEFAULT 0,
        gray_whitelist  JSONB NOT NULL DEFAULT '[]',
        prewarm_status  SMALLINT NOT NULL DEFAULT 0,
        CHECK (sold_count >= 0 AND sold_count <= total_stock),
        CHECK (start_at < end_at)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS orders (
        id              BIGINT PRIMARY KEY,
        order_no        TEXT NOT NULL UNIQUE,
        request_id      TEXT NOT NULL UNIQUE,
        user_id         BIGINT NOT NULL,
        activity_id     BIGINT NOT NULL,
        goods_id        BIGINT NOT NULL,
        quantity        BIGINT NOT NULL,
        unit_price      BIGINT NOT NULL,
        total_amount    BIGINT NOT NULL,
        payment_amount  BIGINT NOT NULL,
        status          SMALLINT NOT NULL DEFAULT 0,
        needs_compensation BOOLEAN NOT NULL DEFAULT FALSE,
        deduct_id       TEXT NOT NULL,
        expire_at       TIMESTAMPTZ NOT NULL,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        paid_at         TIMESTAMPTZ
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_orders_status_expire
        ON orders (status, expire_at)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_orders_user
        ON orders (user_id)"#,
    r#"CREATE TABLE IF NOT EXISTS order_details (
        id              BIGSERIAL PRIMARY KEY,
        order_id        BIGINT NOT NULL REFERENCES orders (id),
        goods_id        BIGINT NOT NULL,
        goods_name      TEXT NOT NULL DEFAULT '',
        quantity        BIGINT NOT NULL,
        unit_price      BIGINT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS stock_logs (
        id              BIGSERIAL PRIMARY KEY,
        activity_id     BIGINT NOT NULL,
        kind            TEXT NOT NULL,
        delta           BIGINT NOT NULL,
        note            TEXT NOT NULL DEFAULT '',
        created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
];

/// Apply the bootstrap DDL (idempotent)
pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in DDL {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::info!("Schema bootstrap complete ({} statements)", DDL.len());
    Ok(())
}
