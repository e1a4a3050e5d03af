//! search_code tool - in-process regex search over project files

use async_trait::async_trait;
use regex::RegexBuilder;
use serde_json::{Value, json};
use std::path::Path;
use walkdir::WalkDir;

use crate::tools::{Tool, ToolContext, ToolError};

/// Search file contents for a regex pattern
pub struct SearchCodeTool;

#[async_trait]
impl Tool for SearchCodeTool {
    fn name(&self) -> &'static str {
        "search_code"
    }

    fn description(&self) -> &'static str {
        "Search project files for a regex pattern. Returns matching lines with file and line number."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regex pattern to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Directory or file to search (default: '.')"
                },
                "case_insensitive": {
                    "type": "boolean",
                    "description": "Case-insensitive search (default: false)"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum matches to return (default: 50)"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let pattern = input
            .get("pattern")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgument("pattern is required".to_string()))?;
        let path = input.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let case_insensitive = input.get("case_insensitive").and_then(|v| v.as_bool()).unwrap_or(false);
        let max_results = input.get("max_results").and_then(|v| v.as_u64()).unwrap_or(50) as usize;

        let regex = RegexBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| ToolError::InvalidArgument(format!("Invalid pattern: {}", e)))?;

        let root = ctx.validate_path(Path::new(path))?;
        let blocked = ctx.security.blocked_directories.clone();
        let max_size = ctx.resource.max_file_size_bytes;
        let max_files = ctx.resource.max_files_per_scan;
        let project_root = ctx.project_root.clone();

        let matches = tokio::task::spawn_blocking(move || {
            let mut matches = Vec::new();
            let mut scanned = 0usize;

            let walker = WalkDir::new(&root).follow_links(false).into_iter().filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                !(e.file_type().is_dir() && blocked.iter().any(|b| *b == name))
            });

            'files: for entry in walker.flatten() {
                if !entry.file_type().is_file() {
                    continue;
                }
                if scanned >= max_files {
                    break;
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
                    if regex.is_match(line) {
                        matches.push(json!({
                            "file": rel,
                            "line": line_idx + 1,
                            "text": line.trim_end(),
                        }));
                        if matches.len() >= max_results {
                            break 'files;
                        }
                    }
                }
            }

            matches
        })
        .await
        .map_err(|e| ToolError::External { message: e.to_string() })?;

        Ok(json!({
            "matches": matches,
            "count": matches.len(),
        }))
    }
}
