//! pattern_match tool - built-in regex vulnerability rules
//!
//! The zero-dependency fallback behind the external scanners. Each rule
//! maps matched lines to a partial finding record.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::OnceLock;
use walkdir::WalkDir;

use crate::tools::{Tool, ToolContext, ToolError};

struct PatternRule {
    vuln_type: &'static str,
    severity: &'static str,
    title: &'static str,
    description: &'static str,
    regex: Regex,
}

fn rules() -> &'static [PatternRule] {
    static RULES: OnceLock<Vec<PatternRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        let rule = |vuln_type, severity, title, description, pattern: &str| PatternRule {
            vuln_type,
            severity,
            title,
            description,
            // Patterns are fixed at compile time; a bad one is a bug
            regex: Regex::new(pattern).expect("invalid builtin pattern"),
        };

        vec![
            rule(
                "sql_injection",
                "high",
                "SQL built by string concatenation",
                "User-controllable input concatenated into a SQL statement enables injection.",
                r#"(?i)["'](select|insert|update|delete)[^"']*["']\s*\+"#,
            ),
            rule(
                "sql_injection",
                "high",
                "SQL built by string interpolation",
                "Interpolating values into a SQL string enables injection.",
                r#"(?i)f["'](select|insert|update|delete)\b"#,
            ),
            rule(
                "command_injection",
                "high",
                "Shell command from dynamic input",
                "Passing dynamic strings to a shell allows command injection.",
                r"(?i)(os\.system\s*\(|subprocess\.\w+\(.*shell\s*=\s*True|\beval\s*\(|\bexec\s*\()",
            ),
            rule(
                "path_traversal",
                "medium",
                "File path from request input",
                "Opening paths derived from request data allows directory traversal.",
                r"(?i)open\s*\(.*(request\.|params\[|input\()",
            ),
            rule(
                "hardcoded_secret",
                "high",
                "Hardcoded credential",
                "Secrets committed to source are exposed to anyone with repo access.",
                r#"(?i)(password|passwd|secret|api_key|apikey|auth_token)\s*=\s*["'][^"']{8,}["']"#,
            ),
            rule(
                "weak_crypto",
                "medium",
                "Weak hash or cipher",
                "MD5/SHA1 and DES are broken for security purposes.",
                r"(?i)(hashlib\.(md5|sha1)\s*\(|\bMD5\s*\(|Cipher\s*\(\s*algorithms\.TripleDES|\bDES\b)",
            ),
            rule(
                "insecure_deserialization",
                "high",
                "Unsafe deserialization",
                "Deserializing untrusted data can execute arbitrary code.",
                r"(?i)(pickle\.loads?\s*\(|marshal\.loads?\s*\(|yaml\.load\s*\()",
            ),
            rule(
                "xss",
                "medium",
                "DOM sink from dynamic content",
                "Writing dynamic content into the DOM without escaping allows XSS.",
                r"(?i)(innerHTML\s*=|document\.write\s*\(|dangerouslySetInnerHTML)",
            ),
        ]
    })
}

/// Built-in pattern scanner; also the configured fallback for semgrep
pub struct PatternMatchTool;

#[async_trait]
impl Tool for PatternMatchTool {
    fn name(&self) -> &'static str {
        "pattern_match"
    }

    fn description(&self) -> &'static str {
        "Scan files with built-in vulnerability regex rules. Returns partial finding records."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File or directory to scan (default: '.')"
                }
            }
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let path = input.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let root = ctx.validate_path(Path::new(path))?;

        let blocked = ctx.security.blocked_directories.clone();
        let max_size = ctx.resource.max_file_size_bytes;
        let max_files = ctx.resource.max_files_per_scan;
        let project_root = ctx.project_root.clone();

        let findings = tokio::task::spawn_blocking(move || {
            let mut findings = Vec::new();
            let mut scanned = 0usize;

            let walker = WalkDir::new(&root).follow_links(false).into_iter().filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                !(e.file_type().is_dir() && blocked.iter().any(|b| *b == name))
            });

            for entry in walker.flatten() {
                if !entry.file_type().is_file() || scanned >= max_files {
                    continue;
                }
                if entry.metadata().map(|m| m.len()).unwrap_or(0) > max_size {
                    continue;
                }
                let Ok(content) = std::fs::read_to_string(entry.path()) else {
                    continue;
                };
                scanned += 1;

                let rel = entry
                    .path()
                    .strip_prefix(&project_root)
                    .unwrap_or(entry.path())
                    .to_string_lossy()
                    .to_string();

                for (line_idx, line) in content.lines().enumerate() {
                    for rule in rules() {
                        if rule.regex.is_match(line) {
                            findings.push(json!({
                                "vuln_type": rule.vuln_type,
                                "severity": rule.severity,
                                "title": rule.title,
                                "description": rule.description,
                                "file_path": rel,
                                "line_start": line_idx + 1,
                                "line_end": line_idx + 1,
                                "snippet": line.trim(),
                            }));
                        }
                    }
                }
            }

            findings
        })
        .await
        .map_err(|e| ToolError::External { message: e.to_string() })?;

        Ok(json!({
            "findings": findings,
            "count": findings.len(),
        }))
    }
}
