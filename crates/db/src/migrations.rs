use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await?;
    tracing::info!(event_name = "db.migrations.applied", "database migrations applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::{run_pending, MIGRATOR};
    use crate::{connect_with_settings, DbPool};

    const TABLES: [&str; 6] =
        ["companies", "customers", "projects", "offers", "number_sequences", "activities"];

    async fn migrated() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");
        pool
    }

    async fn object_exists(pool: &DbPool, kind: &str, name: &str) -> bool {
        sqlx::query("SELECT COUNT(*) AS n FROM sqlite_master WHERE type = ? AND name = ?")
            .bind(kind)
            .bind(name)
            .fetch_one(pool)
            .await
            .expect("query sqlite_master")
            .get::<i64, _>("n")
            == 1
    }

    async fn insert_offer(pool: &DbPool, id: &str, phase: &str, number: &str) -> bool {
        sqlx::query(
            "INSERT INTO offers (id, company_id, title, phase, offer_number, created_by,
                                 updated_by, created_at, updated_at)
             VALUES (?, 'stalbygg', 'Hall', ?, ?, 'kari', 'kari',
                     '2025-01-01T00:00:00.000000Z', '2025-01-01T00:00:00.000000Z')",
        )
        .bind(id)
        .bind(phase)
        .bind(number)
        .execute(pool)
        .await
        .is_ok()
    }

    #[tokio::test]
    async fn baseline_tables_exist_and_rerun_is_a_noop() {
        let pool = migrated().await;
        run_pending(&pool).await.expect("second run");

        for table in TABLES {
            assert!(object_exists(&pool, "table", table).await, "table `{table}` should exist");
        }
        assert!(object_exists(&pool, "index", "idx_offers_company_offer_number").await);
    }

    #[tokio::test]
    async fn undo_removes_every_table() {
        let pool = migrated().await;
        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        for table in TABLES {
            assert!(!object_exists(&pool, "table", table).await, "table `{table}` should be gone");
        }
    }

    #[tokio::test]
    async fn schema_enforces_number_rules() {
        let pool = migrated().await;
        sqlx::query("INSERT INTO companies (id, name) VALUES ('stalbygg', 'Stålbygg AS')")
            .execute(&pool)
            .await
            .expect("company");

        assert!(insert_offer(&pool, "o-1", "draft", "").await);
        assert!(insert_offer(&pool, "o-2", "draft", "").await, "drafts share the empty number");
        assert!(!insert_offer(&pool, "o-3", "draft", "ST-2025-001").await);
        assert!(!insert_offer(&pool, "o-4", "sent", "").await);
        assert!(insert_offer(&pool, "o-5", "sent", "ST-2025-001").await);
        assert!(!insert_offer(&pool, "o-6", "won", "ST-2025-001").await, "numbers are unique");
        assert!(!insert_offer(&pool, "o-7", "archived", "ST-2025-002").await);
    }
}
