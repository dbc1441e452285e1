use anyhow::Result;
use sqlx::SqlitePool;

/// Create the schema. Idempotent; safe to run on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Appliance records and their processing state machine
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS appliances (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            nickname TEXT,
            brand TEXT,
            model TEXT,
            manual_key TEXT,
            extracted_text_key TEXT,
            specs_json TEXT,
            agent_instructions TEXT,
            processing_status TEXT NOT NULL DEFAULT 'QUEUED',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Minimal recipe read model for the adaptation flow
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS recipes (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            title TEXT NOT NULL,
            steps_json TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Vector index backing table: one row per manual chunk, embedding
    // stored as little-endian f32 blob
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS manual_vectors (
            id TEXT PRIMARY KEY,
            appliance_id TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            chunk_text TEXT NOT NULL,
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_appliances_owner ON appliances(owner_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_manual_vectors_scope ON manual_vectors(appliance_id, owner_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_recipes_owner ON recipes(owner_id)")
        .execute(pool)
        .await?;

    Ok(())
}
