//! dataflow_analysis tool - naive intra-file source→sink tracing
//!
//! Finds variables assigned from taint sources (request data, argv,
//! stdin) and flags lines where they reach dangerous sinks. One file at
//! a time; no inter-procedural analysis.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::OnceLock;

use crate::tools::{Tool, ToolContext, ToolError};

fn source_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(\w+)\s*=\s*.*(request\.|input\s*\(|sys\.argv|os\.environ|params\[|req\.body|req\.query)")
            .expect("invalid source pattern")
    })
}

fn sink_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(execute\s*\(|executemany\s*\(|os\.system\s*\(|subprocess\.|\beval\s*\(|open\s*\(|innerHTML|send_file\s*\()")
            .expect("invalid sink pattern")
    })
}

/// Trace tainted variables from sources to sinks within one file
pub struct DataflowTool;

#[async_trait]
impl Tool for DataflowTool {
    fn name(&self) -> &'static str {
        "dataflow_analysis"
    }

    fn description(&self) -> &'static str {
        "Trace variables assigned from taint sources (request data, argv) to dangerous sinks within a file."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File to analyze"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let path = input
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgument("path is required".to_string()))?;

        let full_path = ctx.validate_read_path(Path::new(path))?;
        let content = tokio::fs::read_to_string(&full_path).await?;

        let mut tainted: Vec<(String, usize, String)> = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            if let Some(caps) = source_regex().captures(line) {
                let var = caps[1].to_string();
                tainted.push((var, idx + 1, line.trim().to_string()));
            }
        }

        let mut findings = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            if !sink_regex().is_match(line) {
                continue;
            }
            for (var, source_line, source_text) in &tainted {
                // The sink must mention the tainted variable, later than its assignment
                if idx + 1 > *source_line && mentions_identifier(line, var) {
                    findings.push(json!({
                        "vuln_type": "tainted_dataflow",
                        "severity": "high",
                        "title": format!("Tainted variable '{}' reaches a sink", var),
                        "description": "Data from an untrusted source flows into a dangerous sink without sanitization.",
                        "file_path": path,
                        "line_start": *source_line,
                        "line_end": idx + 1,
                        "snippet": line.trim(),
                        "dataflow": {
                            "source": source_text,
                            "sink": line.trim(),
                            "path": [format!("{}:{}", path, source_line), format!("{}:{}", path, idx + 1)],
                        },
                    }));
                }
            }
        }

        Ok(json!({
            "findings": findings,
            "sources": tainted.len(),
            "count": findings.len(),
        }))
    }
}

fn mentions_identifier(line: &str, ident: &str) -> bool {
    line.split(|c: char| !(c.is_alphanumeric() || c == '_')).any(|t| t == ident)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_source_to_sink_flow() {
        let temp = tempdir().unwrap();
        let source = "user_id = request.args['id']\nquery = build(user_id)\ncursor.execute(user_id)\n";
        fs::write(temp.path().join("app.py"), source).unwrap();

        let ctx = ToolContext::new(temp.path().to_path_buf(), "t1");
        let data = DataflowTool
            .execute(json!({"path": "app.py"}), &ctx)
            .await
            .unwrap();

        assert_eq!(data["count"], 1);
        let finding = &data["findings"][0];
        assert_eq!(finding["vuln_type"], "tainted_dataflow");
        assert_eq!(finding["line_start"], 1);
        assert_eq!(finding["line_end"], 3);
        assert!(finding["dataflow"]["source"].as_str().unwrap().contains("request.args"));
    }

    #[tokio::test]
    async fn test_sink_without_taint_ignored() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("app.py"), "cursor.execute(CONSTANT_QUERY)\n").unwrap();

        let ctx = ToolContext::new(temp.path().to_path_buf(), "t1");
        let data = DataflowTool
            .execute(json!({"path": "app.py"}), &ctx)
            .await
            .unwrap();
        assert_eq!(data["count"], 0);
    }

    #[tokio::test]
    async fn test_identifier_matching_is_word_bounded() {
        assert!(mentions_identifier("execute(user_id)", "user_id"));
        assert!(!mentions_identifier("execute(user_identity)", "user_id"));
    }
}
