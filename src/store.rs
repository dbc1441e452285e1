//! Persisted appliance records and their processing-status state machine.
//!
//! States: `QUEUED → PROCESSING → (COMPLETED | FAILED)`. `QUEUED` is the
//! only initial state; the terminal states have no automatic exit —
//! re-ingestion is an explicit trigger that re-queues the record and
//! re-runs the full pipeline, overwriting fields.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};

use crate::models::{
    chunk_vector_id, legacy_vector_id, Appliance, ApplianceSpecs, ProcessingStatus, Recipe,
};

pub struct ApplianceStore {
    pool: SqlitePool,
}

/// Fields a completing ingestion persists in one update.
pub struct CompletionUpdate {
    pub extracted_text_key: String,
    /// Object key of the stored raw manual bytes. `None` clears the column:
    /// text-only ingestions store nothing at the manual key.
    pub manual_key: Option<String>,
    pub specs: ApplianceSpecs,
    pub agent_instructions: Option<String>,
    /// Brand/model discovered by spec extraction; applied only where the
    /// record has no value yet.
    pub discovered_brand: Option<String>,
    pub discovered_model: Option<String>,
}

impl ApplianceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create an appliance in `QUEUED`, synchronously with the request
    /// that initiates ingestion.
    pub async fn create_queued(
        &self,
        id: &str,
        owner_id: &str,
        nickname: Option<&str>,
        manual_key: &str,
    ) -> Result<Appliance> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO appliances (id, owner_id, nickname, manual_key, processing_status, created_at, updated_at)
            VALUES (?, ?, ?, ?, 'QUEUED', ?, ?)
            "#,
        )
        .bind(id)
        .bind(owner_id)
        .bind(nickname)
        .bind(manual_key)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get(owner_id, id)
            .await?
            .context("appliance row missing immediately after insert")
    }

    /// Reset an existing appliance to `QUEUED` ahead of re-ingestion.
    pub async fn requeue(&self, owner_id: &str, id: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE appliances SET processing_status = 'QUEUED', updated_at = ? WHERE id = ? AND owner_id = ?",
        )
        .bind(now)
        .bind(id)
        .bind(owner_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, owner_id: &str, id: &str) -> Result<Option<Appliance>> {
        let row = sqlx::query("SELECT * FROM appliances WHERE id = ? AND owner_id = ?")
            .bind(id)
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_appliance).transpose()
    }

    pub async fn list(&self, owner_id: &str) -> Result<Vec<Appliance>> {
        let rows = sqlx::query("SELECT * FROM appliances WHERE owner_id = ? ORDER BY created_at DESC")
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_appliance).collect()
    }

    /// `QUEUED → PROCESSING`, set before any extraction work so a status
    /// poll never observes `QUEUED` once work has begun.
    pub async fn mark_processing(&self, id: &str) -> Result<()> {
        self.set_status(id, ProcessingStatus::Processing).await
    }

    /// `PROCESSING → FAILED`. No partial-success encoding; the stage that
    /// failed is visible only in logs.
    pub async fn mark_failed(&self, id: &str) -> Result<()> {
        self.set_status(id, ProcessingStatus::Failed).await
    }

    /// Put a record back into a prior status after a rejected dispatch, so
    /// a requeue whose job was never accepted does not strand the record
    /// in `QUEUED`.
    pub async fn restore_status(&self, id: &str, status: ProcessingStatus) -> Result<()> {
        self.set_status(id, status).await
    }

    async fn set_status(&self, id: &str, status: ProcessingStatus) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE appliances SET processing_status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// `PROCESSING → COMPLETED`, persisting every completion field in one
    /// update: extracted-text key, manual key (cleared when no bytes were
    /// stored), specs (including the vector chunk count), usage
    /// instructions, and discovered brand/model where the record had none.
    pub async fn complete(&self, id: &str, update: CompletionUpdate) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let specs_json = serde_json::to_string(&update.specs)?;
        sqlx::query(
            r#"
            UPDATE appliances SET
                processing_status = 'COMPLETED',
                extracted_text_key = ?,
                manual_key = ?,
                specs_json = ?,
                agent_instructions = ?,
                brand = COALESCE(brand, ?),
                model = COALESCE(model, ?),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&update.extracted_text_key)
        .bind(&update.manual_key)
        .bind(&specs_json)
        .bind(&update.agent_instructions)
        .bind(&update.discovered_brand)
        .bind(&update.discovered_model)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Patch user-mutable fields. Returns false when the appliance does
    /// not exist for this owner.
    pub async fn update_fields(
        &self,
        owner_id: &str,
        id: &str,
        nickname: Option<&str>,
        brand: Option<&str>,
        model: Option<&str>,
        agent_instructions: Option<&str>,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE appliances SET
                nickname = COALESCE(?, nickname),
                brand = COALESCE(?, brand),
                model = COALESCE(?, model),
                agent_instructions = COALESCE(?, agent_instructions),
                updated_at = ?
            WHERE id = ? AND owner_id = ?
            "#,
        )
        .bind(nickname)
        .bind(brand)
        .bind(model)
        .bind(agent_instructions)
        .bind(now)
        .bind(id)
        .bind(owner_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_row(&self, owner_id: &str, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM appliances WHERE id = ? AND owner_id = ?")
            .bind(id)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_recipe(&self, owner_id: &str, id: &str) -> Result<Option<Recipe>> {
        let row = sqlx::query("SELECT * FROM recipes WHERE id = ? AND owner_id = ?")
            .bind(id)
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            let steps_json: String = row.get("steps_json");
            let steps: Vec<String> =
                serde_json::from_str(&steps_json).context("invalid recipe steps JSON")?;
            Ok(Recipe {
                id: row.get("id"),
                owner_id: row.get("owner_id"),
                title: row.get("title"),
                steps,
            })
        })
        .transpose()
    }

    /// Seed helper for the adaptation flow; recipe CRUD proper lives
    /// outside this subsystem.
    pub async fn insert_recipe(&self, recipe: &Recipe) -> Result<()> {
        let steps_json = serde_json::to_string(&recipe.steps)?;
        sqlx::query(
            "INSERT OR REPLACE INTO recipes (id, owner_id, title, steps_json) VALUES (?, ?, ?, ?)",
        )
        .bind(&recipe.id)
        .bind(&recipe.owner_id)
        .bind(&recipe.title)
        .bind(&steps_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Vector ids implied by an appliance record, for deletion.
///
/// Enumerates `appliance:{id}:chunk:0..count-1` from the persisted
/// `vector_chunk_count`; with no count recorded (or zero), falls back to
/// the single legacy-shaped id. A record whose count was not kept in sync
/// by a later re-ingestion will leak entries here.
pub fn vector_ids_for_deletion(appliance: &Appliance) -> Vec<String> {
    let count = appliance
        .specs
        .as_ref()
        .map(|s| s.vector_chunk_count)
        .unwrap_or(0);
    if count == 0 {
        return vec![legacy_vector_id(&appliance.id)];
    }
    (0..count).map(|i| chunk_vector_id(&appliance.id, i)).collect()
}

fn row_to_appliance(row: sqlx::sqlite::SqliteRow) -> Result<Appliance> {
    let specs_json: Option<String> = row.get("specs_json");
    let specs = match specs_json {
        Some(json) => Some(serde_json::from_str(&json).context("invalid specs JSON")?),
        None => None,
    };
    let status_raw: String = row.get("processing_status");
    let processing_status = ProcessingStatus::parse(&status_raw)
        .with_context(|| format!("invalid processing status: {}", status_raw))?;

    Ok(Appliance {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        nickname: row.get("nickname"),
        brand: row.get("brand"),
        model: row.get("model"),
        manual_key: row.get("manual_key"),
        extracted_text_key: row.get("extracted_text_key"),
        specs,
        agent_instructions: row.get("agent_instructions"),
        processing_status,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn appliance_with_count(count: usize) -> Appliance {
        Appliance {
            id: "a1".to_string(),
            owner_id: "u1".to_string(),
            nickname: None,
            brand: None,
            model: None,
            manual_key: None,
            extracted_text_key: None,
            specs: Some(ApplianceSpecs {
                vector_chunk_count: count,
                ..Default::default()
            }),
            agent_instructions: None,
            processing_status: ProcessingStatus::Completed,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn deletion_enumerates_recorded_chunk_count() {
        let ids = vector_ids_for_deletion(&appliance_with_count(3));
        assert_eq!(
            ids,
            vec![
                "appliance:a1:chunk:0",
                "appliance:a1:chunk:1",
                "appliance:a1:chunk:2"
            ]
        );
    }

    #[test]
    fn deletion_falls_back_to_legacy_id() {
        let ids = vector_ids_for_deletion(&appliance_with_count(0));
        assert_eq!(ids, vec!["appliance:a1"]);

        let mut no_specs = appliance_with_count(0);
        no_specs.specs = None;
        assert_eq!(vector_ids_for_deletion(&no_specs), vec!["appliance:a1"]);
    }
}
