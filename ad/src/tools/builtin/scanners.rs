//! External scanner wrappers
//!
//! Each scanner shells out to its binary and normalizes the JSON output
//! into partial finding records with the shared severity mapping
//! (ERROR→high, WARNING→medium, INFO→low).

use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::domain::Severity;
use crate::tools::{Tool, ToolContext, ToolError};

/// Which external scanner this tool wraps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerKind {
    Semgrep,
    Bandit,
    Gitleaks,
    Kunlun,
    NpmAudit,
    Safety,
    Osv,
}

impl ScannerKind {
    fn tool_name(&self) -> &'static str {
        match self {
            ScannerKind::Semgrep => "semgrep_scan",
            ScannerKind::Bandit => "bandit_scan",
            ScannerKind::Gitleaks => "gitleaks_scan",
            ScannerKind::Kunlun => "kunlun_scan",
            ScannerKind::NpmAudit => "npm_audit",
            ScannerKind::Safety => "safety_check",
            ScannerKind::Osv => "osv_scanner",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            ScannerKind::Semgrep => "Run semgrep with the auto config and normalize results to findings.",
            ScannerKind::Bandit => "Run bandit over Python sources and normalize results to findings.",
            ScannerKind::Gitleaks => "Run gitleaks to detect committed secrets.",
            ScannerKind::Kunlun => "Run Kunlun-M static analysis.",
            ScannerKind::NpmAudit => "Run npm audit for vulnerable JavaScript dependencies.",
            ScannerKind::Safety => "Run safety for vulnerable Python dependencies.",
            ScannerKind::Osv => "Run osv-scanner for known-vulnerable dependencies.",
        }
    }

    /// Program and arguments for a scan rooted at `target`
    fn command(&self, target: &Path) -> (&'static str, Vec<String>) {
        let t = target.display().to_string();
        match self {
            ScannerKind::Semgrep => ("semgrep", vec!["scan".into(), "--json".into(), "--config".into(), "auto".into(), t]),
            ScannerKind::Bandit => ("bandit", vec!["-r".into(), "-f".into(), "json".into(), t]),
            ScannerKind::Gitleaks => (
                "gitleaks",
                vec!["detect".into(), "--no-git".into(), "--report-format".into(), "json".into(), "--report-path".into(), "/dev/stdout".into(), "--source".into(), t],
            ),
            ScannerKind::Kunlun => ("kunlun", vec!["scan".into(), "-t".into(), t, "-f".into(), "json".into()]),
            ScannerKind::NpmAudit => ("npm", vec!["audit".into(), "--json".into(), "--prefix".into(), t]),
            ScannerKind::Safety => ("safety", vec!["check".into(), "--json".into(), "-r".into(), format!("{}/requirements.txt", t)]),
            ScannerKind::Osv => ("osv-scanner", vec!["--format".into(), "json".into(), t]),
        }
    }

    /// Map raw scanner JSON to partial finding records
    fn normalize(&self, raw: &Value) -> Vec<Value> {
        match self {
            ScannerKind::Semgrep => normalize_semgrep(raw),
            ScannerKind::Bandit => normalize_bandit(raw),
            ScannerKind::Gitleaks => normalize_gitleaks(raw),
            ScannerKind::Kunlun => normalize_generic(raw, "kunlun"),
            ScannerKind::NpmAudit => normalize_npm_audit(raw),
            ScannerKind::Safety => normalize_safety(raw),
            ScannerKind::Osv => normalize_osv(raw),
        }
    }
}

/// Wrapper tool around one external scanner binary
pub struct ScannerTool {
    kind: ScannerKind,
}

impl ScannerTool {
    pub fn new(kind: ScannerKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl Tool for ScannerTool {
    fn name(&self) -> &'static str {
        self.kind.tool_name()
    }

    fn description(&self) -> &'static str {
        self.kind.description()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to scan (default: '.')"
                }
            }
        })
    }

    fn external(&self) -> bool {
        true
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let path = input.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let target = ctx.validate_path(Path::new(path))?;

        let (program, args) = self.kind.command(&target);
        let output = Command::new(program)
            .args(&args)
            .current_dir(&ctx.project_root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ToolError::InvalidArgument(format!("{} not installed", program))
                } else {
                    ToolError::Io(e)
                }
            })?;

        // Most scanners exit non-zero when they find issues; only treat
        // unparseable output as failure
        let stdout = String::from_utf8_lossy(&output.stdout);
        let raw: Value = match serde_json::from_str(stdout.trim()) {
            Ok(v) => v,
            Err(_) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(ToolError::External {
                    message: format!("{} produced no JSON: {}", program, stderr.chars().take(500).collect::<String>()),
                });
            }
        };

        let findings = self.kind.normalize(&raw);
        Ok(json!({
            "scanner": self.kind.tool_name(),
            "findings": findings,
            "count": findings.len(),
        }))
    }
}

fn severity_str(label: &str) -> &'static str {
    Severity::parse(label).unwrap_or(Severity::Low).as_str()
}

fn normalize_semgrep(raw: &Value) -> Vec<Value> {
    let Some(results) = raw.get("results").and_then(|r| r.as_array()) else {
        return Vec::new();
    };
    results
        .iter()
        .map(|r| {
            let severity = r["extra"]["severity"].as_str().unwrap_or("WARNING");
            json!({
                "vuln_type": r["check_id"].as_str().unwrap_or("semgrep_rule"),
                "severity": severity_str(severity),
                "title": r["check_id"].as_str().unwrap_or("semgrep finding"),
                "description": r["extra"]["message"].as_str().unwrap_or(""),
                "file_path": r["path"].as_str().unwrap_or(""),
                "line_start": r["start"]["line"].as_u64().unwrap_or(0),
                "line_end": r["end"]["line"].as_u64().unwrap_or(0),
                "snippet": r["extra"]["lines"].as_str().unwrap_or(""),
            })
        })
        .collect()
}

fn normalize_bandit(raw: &Value) -> Vec<Value> {
    let Some(results) = raw.get("results").and_then(|r| r.as_array()) else {
        return Vec::new();
    };
    results
        .iter()
        .map(|r| {
            let line = r["line_number"].as_u64().unwrap_or(0);
            json!({
                "vuln_type": r["test_id"].as_str().unwrap_or("bandit_rule"),
                "severity": severity_str(r["issue_severity"].as_str().unwrap_or("LOW")),
                "title": r["test_name"].as_str().unwrap_or("bandit finding"),
                "description": r["issue_text"].as_str().unwrap_or(""),
                "file_path": r["filename"].as_str().unwrap_or(""),
                "line_start": line,
                "line_end": line,
                "snippet": r["code"].as_str().unwrap_or(""),
            })
        })
        .collect()
}

fn normalize_gitleaks(raw: &Value) -> Vec<Value> {
    let Some(leaks) = raw.as_array() else {
        return Vec::new();
    };
    leaks
        .iter()
        .map(|l| {
            json!({
                "vuln_type": "hardcoded_secret",
                "severity": "high",
                "title": format!("Secret detected: {}", l["RuleID"].as_str().unwrap_or("generic")),
                "description": l["Description"].as_str().unwrap_or("Committed secret detected"),
                "file_path": l["File"].as_str().unwrap_or(""),
                "line_start": l["StartLine"].as_u64().unwrap_or(0),
                "line_end": l["EndLine"].as_u64().unwrap_or(0),
                "snippet": l["Match"].as_str().unwrap_or(""),
            })
        })
        .collect()
}

fn normalize_npm_audit(raw: &Value) -> Vec<Value> {
    let Some(vulns) = raw.get("vulnerabilities").and_then(|v| v.as_object()) else {
        return Vec::new();
    };
    vulns
        .iter()
        .map(|(name, v)| {
            json!({
                "vuln_type": "vulnerable_dependency",
                "severity": severity_str(v["severity"].as_str().unwrap_or("low")),
                "title": format!("Vulnerable npm package: {}", name),
                "description": v["via"][0]["title"].as_str().unwrap_or("Known vulnerability"),
                "file_path": "package.json",
                "line_start": 0,
                "line_end": 0,
                "snippet": name,
            })
        })
        .collect()
}

fn normalize_safety(raw: &Value) -> Vec<Value> {
    let Some(vulns) = raw.get("vulnerabilities").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    vulns
        .iter()
        .map(|v| {
            json!({
                "vuln_type": "vulnerable_dependency",
                "severity": "high",
                "title": format!("Vulnerable Python package: {}", v["package_name"].as_str().unwrap_or("unknown")),
                "description": v["advisory"].as_str().unwrap_or(""),
                "file_path": "requirements.txt",
                "line_start": 0,
                "line_end": 0,
                "snippet": v["package_name"].as_str().unwrap_or(""),
            })
        })
        .collect()
}

fn normalize_osv(raw: &Value) -> Vec<Value> {
    let mut findings = Vec::new();
    let Some(results) = raw.get("results").and_then(|r| r.as_array()) else {
        return findings;
    };
    for result in results {
        let source = result["source"]["path"].as_str().unwrap_or("lockfile");
        for package in result["packages"].as_array().map(|a| a.as_slice()).unwrap_or(&[]) {
            let name = package["package"]["name"].as_str().unwrap_or("unknown");
            for vuln in package["vulnerabilities"].as_array().map(|a| a.as_slice()).unwrap_or(&[]) {
                findings.push(json!({
                    "vuln_type": "vulnerable_dependency",
                    "severity": "medium",
                    "title": format!("{}: {}", name, vuln["id"].as_str().unwrap_or("OSV")),
                    "description": vuln["summary"].as_str().unwrap_or(""),
                    "file_path": source,
                    "line_start": 0,
                    "line_end": 0,
                    "snippet": name,
                }));
            }
        }
    }
    findings
}

fn normalize_generic(raw: &Value, scanner: &str) -> Vec<Value> {
    let Some(vulns) = raw.get("vulnerabilities").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    vulns
        .iter()
        .map(|v| {
            json!({
                "vuln_type": v["type"].as_str().unwrap_or(scanner),
                "severity": severity_str(v["severity"].as_str().unwrap_or("medium")),
                "title": v["title"].as_str().unwrap_or("finding"),
                "description": v["description"].as_str().unwrap_or(""),
                "file_path": v["file"].as_str().unwrap_or(""),
                "line_start": v["line"].as_u64().unwrap_or(0),
                "line_end": v["line"].as_u64().unwrap_or(0),
                "snippet": v["code"].as_str().unwrap_or(""),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_semgrep() {
        let raw = json!({
            "results": [{
                "check_id": "python.lang.security.sqli",
                "path": "app/db.py",
                "start": {"line": 14},
                "end": {"line": 15},
                "extra": {
                    "message": "Detected SQL built from string concat",
                    "severity": "ERROR",
                    "lines": "query = \"SELECT \" + user"
                }
            }]
        });

        let findings = normalize_semgrep(&raw);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0]["severity"], "high");
        assert_eq!(findings[0]["file_path"], "app/db.py");
        assert_eq!(findings[0]["line_start"], 14);
        assert_eq!(findings[0]["line_end"], 15);
    }

    #[test]
    fn test_normalize_semgrep_warning_maps_medium() {
        let raw = json!({"results": [{"check_id": "x", "path": "a.py", "start": {"line": 1}, "end": {"line": 1}, "extra": {"severity": "WARNING", "message": "", "lines": ""}}]});
        assert_eq!(normalize_semgrep(&raw)[0]["severity"], "medium");
    }

    #[test]
    fn test_normalize_bandit() {
        let raw = json!({
            "results": [{
                "filename": "app.py",
                "line_number": 7,
                "issue_severity": "HIGH",
                "issue_text": "Use of insecure MD5 hash",
                "test_id": "B303",
                "test_name": "blacklist",
                "code": "hashlib.md5(data)"
            }]
        });

        let findings = normalize_bandit(&raw);
        assert_eq!(findings[0]["vuln_type"], "B303");
        assert_eq!(findings[0]["severity"], "high");
        assert_eq!(findings[0]["line_start"], 7);
    }

    #[test]
    fn test_normalize_gitleaks() {
        let raw = json!([{
            "RuleID": "aws-access-key",
            "Description": "AWS access key",
            "File": ".env",
            "StartLine": 2,
            "EndLine": 2,
            "Match": "AKIA..."
        }]);

        let findings = normalize_gitleaks(&raw);
        assert_eq!(findings[0]["vuln_type"], "hardcoded_secret");
        assert_eq!(findings[0]["severity"], "high");
        assert_eq!(findings[0]["file_path"], ".env");
    }

    #[test]
    fn test_normalize_npm_audit() {
        let raw = json!({
            "vulnerabilities": {
                "lodash": {"severity": "critical", "via": [{"title": "Prototype pollution"}]}
            }
        });

        let findings = normalize_npm_audit(&raw);
        assert_eq!(findings[0]["severity"], "critical");
        assert!(findings[0]["title"].as_str().unwrap().contains("lodash"));
    }

    #[test]
    fn test_normalize_osv() {
        let raw = json!({
            "results": [{
                "source": {"path": "Cargo.lock"},
                "packages": [{
                    "package": {"name": "time"},
                    "vulnerabilities": [{"id": "RUSTSEC-2020-0071", "summary": "Segfault in time"}]
                }]
            }]
        });

        let findings = normalize_osv(&raw);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0]["file_path"], "Cargo.lock");
        assert!(findings[0]["title"].as_str().unwrap().contains("RUSTSEC"));
    }

    #[test]
    fn test_normalize_empty_payloads() {
        assert!(normalize_semgrep(&json!({})).is_empty());
        assert!(normalize_bandit(&json!({"results": []})).is_empty());
        assert!(normalize_gitleaks(&json!({})).is_empty());
        assert!(normalize_safety(&json!(null)).is_empty());
    }
}
