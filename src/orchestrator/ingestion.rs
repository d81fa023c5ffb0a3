//! Flattens a Trivy JSON report into one [`NewVulnerability`] per finding.

use serde_json::Value;

use super::store::NewVulnerability;

const UNKNOWN_CVE: &str = "Unknown";

/// Walks `Results[].Vulnerabilities[]`. A missing or empty structure
/// yields no findings.
pub fn normalize(report: &Value) -> Vec<NewVulnerability> {
    report
        .get("Results")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|result| result.get("Vulnerabilities").and_then(Value::as_array))
        .flatten()
        .map(normalize_finding)
        .collect()
}

fn text(finding: &Value, key: &str) -> Option<String> {
    finding
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn normalize_finding(finding: &Value) -> NewVulnerability {
    NewVulnerability {
        cve_id: text(finding, "VulnerabilityID").unwrap_or_else(|| UNKNOWN_CVE.to_string()),
        cvss: finding.get("CVSS").and_then(cvss_score),
        severity: text(finding, "Severity"),
        description: text(finding, "Description"),
        recommendation: Some(recommendation(finding)),
        details: finding.clone(),
    }
}

fn score(entry: &Value, key: &str) -> Option<String> {
    match entry.get(key)? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Trivy keys scores by source (`nvd`, `redhat`, ...). A flat object with a
/// `V3Score` is accepted too. NVD wins, then any source, V3 before V2.
fn cvss_score(cvss: &Value) -> Option<String> {
    let sources = cvss.as_object()?;
    score(cvss, "V3Score")
        .or_else(|| sources.get("nvd").and_then(|nvd| score(nvd, "V3Score")))
        .or_else(|| sources.values().find_map(|source| score(source, "V3Score")))
        .or_else(|| sources.get("nvd").and_then(|nvd| score(nvd, "V2Score")))
        .or_else(|| sources.values().find_map(|source| score(source, "V2Score")))
}

fn recommendation(finding: &Value) -> String {
    let mut hint = String::new();
    if let Some(fixed) = text(finding, "FixedVersion") {
        hint.push_str(&format!("Update to version: {fixed}. "));
    }
    if let Some(url) = text(finding, "PrimaryURL") {
        hint.push_str(&format!("Details: {url}"));
    }
    if hint.is_empty() {
        let first_reference = finding
            .get("References")
            .and_then(Value::as_array)
            .and_then(|refs| refs.first())
            .and_then(Value::as_str);
        if let Some(reference) = first_reference {
            hint = format!("More information: {reference}");
        }
    }
    hint.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_reports_yield_nothing() {
        assert!(normalize(&Value::Null).is_empty());
        assert!(normalize(&json!({})).is_empty());
        assert!(normalize(&json!({ "Results": [] })).is_empty());
        assert!(normalize(&json!({ "Results": [{ "Target": "alpine" }] })).is_empty());
    }

    #[test]
    fn test_findings_across_result_blocks() {
        let report = json!({
            "Results": [
                {
                    "Target": "debian",
                    "Vulnerabilities": [
                        { "VulnerabilityID": "CVE-2024-1", "Severity": "HIGH" },
                        { "VulnerabilityID": "CVE-2024-2", "Severity": "LOW" }
                    ]
                },
                { "Target": "go.mod" },
                {
                    "Target": "requirements.txt",
                    "Vulnerabilities": [{ "Severity": "MEDIUM" }]
                }
            ]
        });

        let findings = normalize(&report);
        let ids: Vec<&str> = findings.iter().map(|f| f.cve_id.as_str()).collect();
        assert_eq!(ids, ["CVE-2024-1", "CVE-2024-2", "Unknown"]);
        assert_eq!(findings[2].severity.as_deref(), Some("MEDIUM"));
    }

    #[test]
    fn test_finding_fields() {
        let raw = json!({
            "VulnerabilityID": "CVE-2023-4863",
            "Severity": "CRITICAL",
            "Description": "Heap buffer overflow in libwebp",
            "FixedVersion": "1.3.2",
            "PrimaryURL": "https://avd.aquasec.com/nvd/cve-2023-4863",
            "CVSS": {
                "redhat": { "V3Score": 8.8 },
                "nvd": { "V2Score": 6.8, "V3Score": 9.6 }
            }
        });

        let finding = normalize_finding(&raw);
        assert_eq!(finding.cvss.as_deref(), Some("9.6"));
        assert_eq!(finding.severity.as_deref(), Some("CRITICAL"));
        assert_eq!(
            finding.recommendation.as_deref(),
            Some("Update to version: 1.3.2. Details: https://avd.aquasec.com/nvd/cve-2023-4863")
        );
        assert_eq!(finding.details, raw);
    }

    #[test]
    fn test_cvss_fallbacks() {
        assert_eq!(cvss_score(&json!({ "V3Score": 5.3 })).as_deref(), Some("5.3"));
        assert_eq!(
            cvss_score(&json!({ "ghsa": { "V3Score": 7.1 } })).as_deref(),
            Some("7.1")
        );
        assert_eq!(
            cvss_score(&json!({ "nvd": { "V2Score": 4.3 } })).as_deref(),
            Some("4.3")
        );
        assert_eq!(cvss_score(&json!({})), None);
        assert_eq!(cvss_score(&json!("high")), None);
    }

    #[test]
    fn test_recommendation_fallbacks() {
        let fixed_only = json!({ "FixedVersion": "2.0" });
        assert_eq!(recommendation(&fixed_only), "Update to version: 2.0.");

        let references = json!({ "References": ["https://example.com/a", "https://example.com/b"] });
        assert_eq!(
            recommendation(&references),
            "More information: https://example.com/a"
        );

        assert_eq!(recommendation(&json!({})), "");
    }
}
