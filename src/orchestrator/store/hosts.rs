use uuid::Uuid;

use super::db::{Store, StoreError};
use super::models::{Host, HostUpdate, NewHost, Page};

impl Store {
    pub async fn create_host(&self, host: &NewHost) -> Result<Host, StoreError> {
        let id = Uuid::new_v4().to_string();

        sqlx::query("INSERT INTO hosts (id, name, address, port, description) VALUES (?, ?, ?, ?, ?)")
            .bind(&id)
            .bind(&host.name)
            .bind(&host.address)
            .bind(host.port)
            .bind(&host.description)
            .execute(self.pool())
            .await?;

        log::info!("Registered host {} ({}:{}) as {id}", host.name, host.address, host.port);
        self.get_host(&id).await
    }

    pub async fn get_host(&self, id: &str) -> Result<Host, StoreError> {
        sqlx::query_as::<_, Host>("SELECT * FROM hosts WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("Host {id}")))
    }

    pub async fn list_hosts(&self, page: Page) -> Result<Vec<Host>, StoreError> {
        let hosts =
            sqlx::query_as::<_, Host>("SELECT * FROM hosts ORDER BY rowid LIMIT ? OFFSET ?")
                .bind(page.limit)
                .bind(page.skip)
                .fetch_all(self.pool())
                .await?;
        Ok(hosts)
    }

    pub async fn update_host(&self, id: &str, update: &HostUpdate) -> Result<Host, StoreError> {
        let current = self.get_host(id).await?;

        sqlx::query("UPDATE hosts SET name = ?, address = ?, port = ?, description = ? WHERE id = ?")
            .bind(update.name.as_ref().unwrap_or(&current.name))
            .bind(update.address.as_ref().unwrap_or(&current.address))
            .bind(update.port.unwrap_or(current.port))
            .bind(update.description.as_ref().or(current.description.as_ref()))
            .bind(id)
            .execute(self.pool())
            .await?;

        self.get_host(id).await
    }

    /// Removes the host together with its containers, their scan history and
    /// every vulnerability recorded by those scans.
    pub async fn delete_host(&self, id: &str) -> Result<(), StoreError> {
        let mut tx = self.begin_write().await?;

        sqlx::query(
            "DELETE FROM vulnerabilities WHERE scan_id IN (SELECT scan_id FROM scan_history WHERE host_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM scan_history WHERE host_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM containers WHERE host_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let deleted = sqlx::query("DELETE FROM hosts WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if deleted.rows_affected() == 0 {
            // Nothing to undo, dropping the transaction rolls it back.
            return Err(StoreError::NotFound(format!("Host {id}")));
        }

        tx.commit().await?;
        log::info!("Deleted host {id}");
        Ok(())
    }
}
