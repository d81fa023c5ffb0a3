use chrono::Utc;
use sqlx::types::Json;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use uuid::Uuid;

use super::containers::set_container_status;
use super::db::{Store, StoreError};
use super::models::{
    ContainerStatus, NewVulnerability, Page, ScanHistory, Vulnerability, VulnerabilityFilter,
};
use crate::wire::ScanStatus;

async fn fetch_scan(conn: &mut SqliteConnection, scan_id: &str) -> Result<ScanHistory, StoreError> {
    sqlx::query_as::<_, ScanHistory>("SELECT * FROM scan_history WHERE scan_id = ?")
        .bind(scan_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("Scan {scan_id}")))
}

/// Moves a non-terminal scan into `status` and stamps its finish time.
/// Returns `false` when the scan was already terminal.
async fn finish_scan(
    conn: &mut SqliteConnection,
    scan_id: &str,
    status: ScanStatus,
    container_status: ContainerStatus,
) -> Result<bool, StoreError> {
    let finished: Option<(String, String)> = sqlx::query_as(
        "UPDATE scan_history SET status = ?, finished_at = ? \
         WHERE scan_id = ? AND status IN ('pending', 'running') \
         RETURNING host_id, container_id",
    )
    .bind(status)
    .bind(Utc::now())
    .bind(scan_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some((host_id, container_id)) = finished else {
        // Unknown scans are NotFound, terminal ones are left alone.
        fetch_scan(conn, scan_id).await?;
        return Ok(false);
    };

    set_container_status(conn, &host_id, &container_id, container_status).await?;
    Ok(true)
}

impl Store {
    /// Records a pending scan and flags its container as scanning.
    pub async fn create_scan(
        &self,
        host_id: &str,
        container_id: &str,
    ) -> Result<ScanHistory, StoreError> {
        let scan = ScanHistory {
            scan_id: Uuid::new_v4().to_string(),
            host_id: host_id.to_string(),
            container_id: container_id.to_string(),
            agent_scan_id: None,
            status: ScanStatus::Pending,
            started_at: Utc::now(),
            finished_at: None,
        };

        let mut tx = self.begin_write().await?;
        sqlx::query(
            "INSERT INTO scan_history (scan_id, host_id, container_id, status, started_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&scan.scan_id)
        .bind(&scan.host_id)
        .bind(&scan.container_id)
        .bind(scan.status)
        .bind(scan.started_at)
        .execute(&mut *tx)
        .await?;
        set_container_status(&mut *tx, host_id, container_id, ContainerStatus::Scanning).await?;
        tx.commit().await?;

        Ok(scan)
    }

    pub async fn get_scan(&self, scan_id: &str) -> Result<ScanHistory, StoreError> {
        let mut conn = self.pool().acquire().await?;
        fetch_scan(&mut *conn, scan_id).await
    }

    /// Newest first.
    pub async fn list_scans(&self, page: Page) -> Result<Vec<ScanHistory>, StoreError> {
        let scans = sqlx::query_as::<_, ScanHistory>(
            "SELECT * FROM scan_history ORDER BY julianday(started_at) DESC, rowid DESC \
             LIMIT ? OFFSET ?",
        )
        .bind(page.limit)
        .bind(page.skip)
        .fetch_all(self.pool())
        .await?;
        Ok(scans)
    }

    pub async fn attach_agent_scan(
        &self,
        scan_id: &str,
        agent_scan_id: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE scan_history SET agent_scan_id = ? WHERE scan_id = ?")
            .bind(agent_scan_id)
            .bind(scan_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Returns `false` unless the scan was pending.
    pub async fn mark_scan_running(&self, scan_id: &str) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            "UPDATE scan_history SET status = 'running' WHERE scan_id = ? AND status = 'pending'",
        )
        .bind(scan_id)
        .execute(self.pool())
        .await?;
        Ok(updated.rows_affected() > 0)
    }

    /// Marks the scan and its container as errored.
    /// Returns `false` when the scan was already terminal.
    pub async fn fail_scan(&self, scan_id: &str) -> Result<bool, StoreError> {
        let mut tx = self.begin_write().await?;
        let changed = finish_scan(&mut *tx, scan_id, ScanStatus::Error, ContainerStatus::Error).await?;
        tx.commit().await?;
        Ok(changed)
    }

    /// Completes the scan and stores its findings in one transaction.
    /// Returns `false`, writing nothing, when the scan was already terminal.
    pub async fn complete_scan(
        &self,
        scan_id: &str,
        findings: &[NewVulnerability],
    ) -> Result<bool, StoreError> {
        let mut tx = self.begin_write().await?;

        if !finish_scan(&mut *tx, scan_id, ScanStatus::Completed, ContainerStatus::Scanned).await? {
            return Ok(false);
        }

        for finding in findings {
            sqlx::query(
                "INSERT INTO vulnerabilities \
                 (id, scan_id, cve_id, cvss, severity, description, recommendation, details) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(scan_id)
            .bind(&finding.cve_id)
            .bind(&finding.cvss)
            .bind(&finding.severity)
            .bind(&finding.description)
            .bind(&finding.recommendation)
            .bind(Json(&finding.details))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    pub async fn scan_vulnerabilities(&self, scan_id: &str) -> Result<Vec<Vulnerability>, StoreError> {
        let vulnerabilities = sqlx::query_as::<_, Vulnerability>(
            "SELECT * FROM vulnerabilities WHERE scan_id = ? ORDER BY rowid",
        )
        .bind(scan_id)
        .fetch_all(self.pool())
        .await?;
        Ok(vulnerabilities)
    }

    pub async fn list_vulnerabilities(
        &self,
        filter: &VulnerabilityFilter,
        page: Page,
    ) -> Result<Vec<Vulnerability>, StoreError> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT v.* FROM vulnerabilities v \
             JOIN scan_history s ON s.scan_id = v.scan_id WHERE 1 = 1",
        );
        if let Some(scan_id) = &filter.scan_id {
            query.push(" AND v.scan_id = ").push_bind(scan_id);
        }
        if let Some(host_id) = &filter.host_id {
            query.push(" AND s.host_id = ").push_bind(host_id);
        }
        if let Some(container_id) = &filter.container_id {
            query.push(" AND s.container_id = ").push_bind(container_id);
        }
        query
            .push(" ORDER BY v.rowid LIMIT ")
            .push_bind(page.limit)
            .push(" OFFSET ")
            .push_bind(page.skip);

        let vulnerabilities = query
            .build_query_as::<Vulnerability>()
            .fetch_all(self.pool())
            .await?;
        Ok(vulnerabilities)
    }

    pub async fn get_vulnerability(&self, id: &str) -> Result<Vulnerability, StoreError> {
        sqlx::query_as::<_, Vulnerability>("SELECT * FROM vulnerabilities WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("Vulnerability {id}")))
    }

    /// Number of distinct containers with at least one scan reporting `cve_id`.
    pub async fn count_containers_with_cve(&self, cve_id: &str) -> Result<u32, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM (SELECT DISTINCT s.host_id, s.container_id \
             FROM vulnerabilities v JOIN scan_history s ON s.scan_id = v.scan_id \
             WHERE v.cve_id = ?)",
        )
        .bind(cve_id)
        .fetch_one(self.pool())
        .await?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }
}
