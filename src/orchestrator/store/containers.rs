use std::collections::HashSet;

use sqlx::SqliteConnection;

use super::db::{Store, StoreError};
use super::models::{Container, ContainerStatus};
use crate::wire::ContainerInfo;

pub(super) async fn set_container_status(
    conn: &mut SqliteConnection,
    host_id: &str,
    container_id: &str,
    status: ContainerStatus,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE containers SET status = ? WHERE host_id = ? AND container_id = ?")
        .bind(status)
        .bind(host_id)
        .bind(container_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Deletes one container with its scan history and their vulnerabilities.
async fn delete_container_tree(
    conn: &mut SqliteConnection,
    host_id: &str,
    container_id: &str,
) -> Result<(), StoreError> {
    sqlx::query(
        "DELETE FROM vulnerabilities WHERE scan_id IN \
         (SELECT scan_id FROM scan_history WHERE host_id = ? AND container_id = ?)",
    )
    .bind(host_id)
    .bind(container_id)
    .execute(&mut *conn)
    .await?;

    sqlx::query("DELETE FROM scan_history WHERE host_id = ? AND container_id = ?")
        .bind(host_id)
        .bind(container_id)
        .execute(&mut *conn)
        .await?;

    sqlx::query("DELETE FROM containers WHERE host_id = ? AND container_id = ?")
        .bind(host_id)
        .bind(container_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

impl Store {
    pub async fn list_containers(&self, host_id: &str) -> Result<Vec<Container>, StoreError> {
        let containers = sqlx::query_as::<_, Container>(
            "SELECT * FROM containers WHERE host_id = ? ORDER BY name, container_id",
        )
        .bind(host_id)
        .fetch_all(self.pool())
        .await?;
        Ok(containers)
    }

    pub async fn get_container(
        &self,
        host_id: &str,
        container_id: &str,
    ) -> Result<Container, StoreError> {
        sqlx::query_as::<_, Container>(
            "SELECT * FROM containers WHERE host_id = ? AND container_id = ?",
        )
        .bind(host_id)
        .bind(container_id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("Container {container_id} on host {host_id}")))
    }

    /// Mirrors the containers an agent reported. Known containers keep their
    /// scan status, new ones start idle and the ones the agent no longer
    /// reports are deleted.
    pub async fn sync_containers(
        &self,
        host_id: &str,
        reported: &[ContainerInfo],
    ) -> Result<Vec<Container>, StoreError> {
        let mut tx = self.begin_write().await?;

        for info in reported {
            sqlx::query(
                "INSERT INTO containers (container_id, host_id, name, image, status) \
                 VALUES (?, ?, ?, ?, ?) \
                 ON CONFLICT (container_id, host_id) DO UPDATE SET \
                 name = excluded.name, image = excluded.image",
            )
            .bind(&info.id)
            .bind(host_id)
            .bind(&info.name)
            .bind(&info.image)
            .bind(ContainerStatus::Idle)
            .execute(&mut *tx)
            .await?;
        }

        let reported_ids: HashSet<&str> = reported.iter().map(|info| info.id.as_str()).collect();
        let stored: Vec<String> =
            sqlx::query_scalar("SELECT container_id FROM containers WHERE host_id = ?")
                .bind(host_id)
                .fetch_all(&mut *tx)
                .await?;

        for container_id in stored
            .iter()
            .filter(|id| !reported_ids.contains(id.as_str()))
        {
            log::info!("Container {container_id} is gone from host {host_id}, pruning it");
            delete_container_tree(&mut *tx, host_id, container_id).await?;
        }

        tx.commit().await?;
        self.list_containers(host_id).await
    }
}
