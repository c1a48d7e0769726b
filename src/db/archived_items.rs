//! Archived items database repository

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use crate::services::inventory::MediaCandidate;

/// SQLite caps bound parameters per statement; stay well below it
const IDS_PER_QUERY: usize = 500;

/// Archived item record from database
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ArchivedItemRecord {
    pub id: String,
    pub title: Option<String>,
    pub view_count: Option<i64>,
    pub added_at: Option<i64>,
    pub originally_available_at: Option<String>,
    pub last_viewed_at: Option<i64>,
    pub thumb: Option<String>,
    pub archived_at: DateTime<Utc>,
}

impl From<&MediaCandidate> for ArchivedItemRecord {
    fn from(candidate: &MediaCandidate) -> Self {
        Self {
            id: candidate.id.clone(),
            title: candidate.title.clone(),
            view_count: candidate.view_count,
            added_at: candidate.added_at,
            originally_available_at: candidate.originally_available_at.clone(),
            last_viewed_at: candidate.last_viewed_at,
            thumb: candidate.thumb.clone(),
            archived_at: Utc::now(),
        }
    }
}

pub struct ArchivedItemRepository {
    pool: SqlitePool,
}

impl ArchivedItemRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Archived items whose id is in `ids`
    pub async fn find_by_ids(&self, ids: &HashSet<String>) -> Result<Vec<ArchivedItemRecord>, sqlx::Error> {
        let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
        let mut records = Vec::new();

        for chunk in ids.chunks(IDS_PER_QUERY) {
            let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
                r#"
                SELECT id, title, view_count, added_at, originally_available_at,
                       last_viewed_at, thumb, archived_at
                FROM archived_items
                WHERE id IN ("#,
            );
            let mut separated = query.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            records.extend(
                query
                    .build_query_as::<ArchivedItemRecord>()
                    .fetch_all(&self.pool)
                    .await?,
            );
        }

        Ok(records)
    }

    /// Get an archived item by id
    pub async fn get(&self, id: &str) -> Result<Option<ArchivedItemRecord>, sqlx::Error> {
        sqlx::query_as::<_, ArchivedItemRecord>(
            r#"
            SELECT id, title, view_count, added_at, originally_available_at,
                   last_viewed_at, thumb, archived_at
            FROM archived_items
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// All archived items, most recent first
    pub async fn list(&self) -> Result<Vec<ArchivedItemRecord>, sqlx::Error> {
        sqlx::query_as::<_, ArchivedItemRecord>(
            r#"
            SELECT id, title, view_count, added_at, originally_available_at,
                   last_viewed_at, thumb, archived_at
            FROM archived_items
            ORDER BY archived_at DESC, id
            "#,
        )
        .fetch_all(&self.pool)
        .await
    }

    pub async fn count(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM archived_items")
            .fetch_one(&self.pool)
            .await
    }

    /// Insert several items in one transaction
    pub async fn save_all(&self, items: &[ArchivedItemRecord]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for item in items {
            insert(&mut tx, item).await?;
        }
        tx.commit().await
    }

    /// Delete an item; its files go with it
    pub async fn delete_by_id(&self, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM archived_items WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Insert one item on an existing connection or transaction
pub(crate) async fn insert(
    conn: &mut SqliteConnection,
    item: &ArchivedItemRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO archived_items (
            id, title, view_count, added_at, originally_available_at,
            last_viewed_at, thumb, archived_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&item.id)
    .bind(&item.title)
    .bind(item.view_count)
    .bind(item.added_at)
    .bind(&item.originally_available_at)
    .bind(item.last_viewed_at)
    .bind(&item.thumb)
    .bind(item.archived_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CreateArchivedFile, Database};
    use pretty_assertions::assert_eq;

    fn item(id: &str) -> ArchivedItemRecord {
        ArchivedItemRecord {
            id: id.to_string(),
            title: Some(format!("Movie {}", id)),
            view_count: Some(3),
            added_at: Some(1546300800),
            originally_available_at: Some("1995-12-15".to_string()),
            last_viewed_at: Some(1580515200),
            thumb: Some("/thumb".to_string()),
            archived_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_save_and_find_by_ids() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.archived_items();
        repo.save_all(&[item("1"), item("2"), item("3")]).await.unwrap();

        let wanted: HashSet<String> = ["2", "3", "404"].iter().map(|s| s.to_string()).collect();
        let mut found = repo.find_by_ids(&wanted).await.unwrap();
        found.sort_by(|a, b| a.id.cmp(&b.id));

        assert_eq!(found, vec![item("2"), item("3")]);
        assert!(repo.find_by_ids(&HashSet::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_by_ids_spans_chunks() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.archived_items();
        let items: Vec<_> = (0..IDS_PER_QUERY + 20).map(|i| item(&i.to_string())).collect();
        repo.save_all(&items).await.unwrap();

        let wanted: HashSet<String> = items.iter().map(|i| i.id.clone()).collect();
        assert_eq!(repo.find_by_ids(&wanted).await.unwrap().len(), items.len());
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected_atomically() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.archived_items();
        repo.save_all(&[item("1")]).await.unwrap();

        assert!(repo.save_all(&[item("2"), item("1")]).await.is_err());
        assert!(repo.get("2").await.unwrap().is_none());
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_cascades_to_files() {
        let db = Database::in_memory().await.unwrap();
        let files = [
            CreateArchivedFile {
                original_path: "/m/a.mkv".to_string(),
                backup_path: "root@host:/a/a.mkv".to_string(),
            },
            CreateArchivedFile {
                original_path: "/m/b.mkv".to_string(),
                backup_path: "root@host:/a/b.mkv".to_string(),
            },
        ];
        db.record_archive(&item("9"), &files).await.unwrap();
        assert_eq!(db.archived_files().count_by_item("9").await.unwrap(), 2);

        assert!(db.archived_items().delete_by_id("9").await.unwrap());
        assert!(!db.archived_items().delete_by_id("9").await.unwrap());
        assert_eq!(db.archived_files().count_by_item("9").await.unwrap(), 0);
        assert!(db.archived_items().get("9").await.unwrap().is_none());
    }
}
