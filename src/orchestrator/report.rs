use std::str::FromStr;

use serde::Serialize;

use super::error::ApiError;
use super::store::{ScanHistory, Vulnerability};

/// A scan with every vulnerability it produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanReport {
    #[serde(flatten)]
    pub scan: ScanHistory,
    pub vulnerabilities: Vec<Vulnerability>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Json,
    Csv,
}

impl FromStr for ReportFormat {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(ApiError::Validation(format!(
                "Unsupported report format {other:?}, expected json or csv"
            ))),
        }
    }
}

impl ReportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Csv => "text/csv; charset=utf-8",
        }
    }
}

pub fn file_name(scan_id: &str, format: ReportFormat) -> String {
    format!("aegis-scan-report-{scan_id}.{}", format.extension())
}

pub fn render(report: &ScanReport, format: ReportFormat) -> Result<String, ApiError> {
    match format {
        ReportFormat::Json => serde_json::to_string_pretty(report)
            .map_err(|e| ApiError::Internal(format!("Unable to serialize report: {e}"))),
        ReportFormat::Csv => Ok(to_csv(&report.vulnerabilities)),
    }
}

const CSV_HEADER: &str = "cve_id,severity,cvss,description,recommendation";

fn to_csv(vulnerabilities: &[Vulnerability]) -> String {
    let mut out = String::with_capacity(64 * (vulnerabilities.len() + 1));
    out.push_str(CSV_HEADER);
    out.push('\n');

    for v in vulnerabilities {
        let fields = [
            v.cve_id.as_str(),
            v.severity.as_deref().unwrap_or_default(),
            v.cvss.as_deref().unwrap_or_default(),
            v.description.as_deref().unwrap_or_default(),
            v.recommendation.as_deref().unwrap_or_default(),
        ];
        let row: Vec<String> = fields.iter().map(|field| csv_escape(field)).collect();
        out.push_str(&row.join(","));
        out.push('\n');
    }

    out
}

fn csv_escape(s: &str) -> String {
    let needs_quoting = s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r');
    if needs_quoting {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::ScanStatus;
    use chrono::Utc;
    use sqlx::types::Json;

    fn vulnerability(cve_id: &str, description: &str) -> Vulnerability {
        Vulnerability {
            id: format!("v-{cve_id}"),
            scan_id: "s1".to_string(),
            cve_id: cve_id.to_string(),
            cvss: Some("9.1".to_string()),
            severity: Some("HIGH".to_string()),
            description: Some(description.to_string()),
            recommendation: Some("r".to_string()),
            details: Json(serde_json::json!({ "PkgName": "openssl" })),
        }
    }

    fn report(vulnerabilities: Vec<Vulnerability>) -> ScanReport {
        ScanReport {
            scan: ScanHistory {
                scan_id: "s1".to_string(),
                host_id: "h1".to_string(),
                container_id: "c1".to_string(),
                agent_scan_id: Some("a1".to_string()),
                status: ScanStatus::Completed,
                started_at: Utc::now(),
                finished_at: Some(Utc::now()),
            },
            vulnerabilities,
        }
    }

    #[test]
    fn test_csv_single_row() {
        let csv = render(&report(vec![vulnerability("CVE-1", "d")]), ReportFormat::Csv).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines, [CSV_HEADER, "CVE-1,HIGH,9.1,d,r"]);
    }

    #[test]
    fn test_csv_quoting() {
        let csv = to_csv(&[vulnerability("CVE-2", "overflow, \"remote\"\nexploit")]);
        assert!(
            csv.contains("CVE-2,HIGH,9.1,\"overflow, \"\"remote\"\"\nexploit\",r"),
            "{csv}"
        );
    }

    #[test]
    fn test_csv_without_vulnerabilities() {
        assert_eq!(to_csv(&[]), format!("{CSV_HEADER}\n"));
    }

    #[test]
    fn test_json_is_nested() {
        let json = render(&report(vec![vulnerability("CVE-1", "d")]), ReportFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["scan_id"], "s1");
        assert_eq!(value["status"], "completed");
        assert_eq!(value["vulnerabilities"][0]["cve_id"], "CVE-1");
        assert_eq!(value["vulnerabilities"][0]["details"]["PkgName"], "openssl");
    }

    #[test]
    fn test_formats() {
        assert_eq!("csv".parse::<ReportFormat>().unwrap(), ReportFormat::Csv);
        assert!(matches!(
            "xml".parse::<ReportFormat>(),
            Err(ApiError::Validation(_))
        ));
        assert_eq!(
            file_name("s1", ReportFormat::Json),
            "aegis-scan-report-s1.json"
        );
    }
}
