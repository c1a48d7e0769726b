//! Archived files database repository

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

/// One backed-up file belonging to an archived item
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ArchivedFileRecord {
    pub id: i64,
    pub item_id: String,
    pub original_path: String,
    /// `user@host:path` on the archive host
    pub backup_path: String,
    pub archived_at: DateTime<Utc>,
}

/// Input for creating an archived file row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateArchivedFile {
    pub original_path: String,
    pub backup_path: String,
}

pub struct ArchivedFileRepository {
    pool: SqlitePool,
}

impl ArchivedFileRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Files of an item, in insertion order
    pub async fn list_by_item(&self, item_id: &str) -> Result<Vec<ArchivedFileRecord>, sqlx::Error> {
        sqlx::query_as::<_, ArchivedFileRecord>(
            r#"
            SELECT id, item_id, original_path, backup_path, archived_at
            FROM archived_files
            WHERE item_id = ?
            ORDER BY id
            "#,
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn count_by_item(&self, item_id: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM archived_files WHERE item_id = ?")
            .bind(item_id)
            .fetch_one(&self.pool)
            .await
    }

    /// Items that have no file rows. Should always be empty.
    pub async fn list_items_without_files(&self) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT i.id
            FROM archived_items i
            LEFT JOIN archived_files f ON f.item_id = i.id
            WHERE f.id IS NULL
            ORDER BY i.id
            "#,
        )
        .fetch_all(&self.pool)
        .await
    }

    /// Insert files for an existing item in one transaction
    pub async fn save_all(
        &self,
        item_id: &str,
        files: &[CreateArchivedFile],
    ) -> Result<Vec<ArchivedFileRecord>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let mut records = Vec::with_capacity(files.len());
        for file in files {
            records.push(insert(&mut tx, item_id, file).await?);
        }
        tx.commit().await?;
        Ok(records)
    }
}

/// Insert one file row on an existing connection or transaction
pub(crate) async fn insert(
    conn: &mut SqliteConnection,
    item_id: &str,
    file: &CreateArchivedFile,
) -> Result<ArchivedFileRecord, sqlx::Error> {
    sqlx::query_as::<_, ArchivedFileRecord>(
        r#"
        INSERT INTO archived_files (item_id, original_path, backup_path, archived_at)
        VALUES (?, ?, ?, ?)
        RETURNING id, item_id, original_path, backup_path, archived_at
        "#,
    )
    .bind(item_id)
    .bind(&file.original_path)
    .bind(&file.backup_path)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ArchivedItemRecord, Database};
    use pretty_assertions::assert_eq;

    fn item(id: &str) -> ArchivedItemRecord {
        ArchivedItemRecord {
            id: id.to_string(),
            title: None,
            view_count: None,
            added_at: None,
            originally_available_at: None,
            last_viewed_at: None,
            thumb: None,
            archived_at: Utc::now(),
        }
    }

    fn file(name: &str) -> CreateArchivedFile {
        CreateArchivedFile {
            original_path: format!("/m/{}", name),
            backup_path: format!("root@host:/archive/{}", name),
        }
    }

    #[tokio::test]
    async fn test_save_and_list_by_item() {
        let db = Database::in_memory().await.unwrap();
        db.archived_items().save_all(&[item("7")]).await.unwrap();

        let saved = db
            .archived_files()
            .save_all("7", &[file("a.mkv"), file("b.mkv")])
            .await
            .unwrap();
        assert_eq!(saved.len(), 2);

        let listed = db.archived_files().list_by_item("7").await.unwrap();
        assert_eq!(listed, saved);
        assert_eq!(listed[0].original_path, "/m/a.mkv");
        assert_eq!(listed[1].backup_path, "root@host:/archive/b.mkv");
    }

    #[tokio::test]
    async fn test_file_requires_existing_item() {
        let db = Database::in_memory().await.unwrap();
        assert!(db.archived_files().save_all("missing", &[file("a.mkv")]).await.is_err());
        assert_eq!(db.archived_files().count_by_item("missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_items_without_files() {
        let db = Database::in_memory().await.unwrap();
        db.archived_items().save_all(&[item("bare")]).await.unwrap();
        db.record_archive(&item("full"), &[file("a.mkv")]).await.unwrap();

        assert_eq!(
            db.archived_files().list_items_without_files().await.unwrap(),
            vec!["bare".to_string()]
        );
    }
}
