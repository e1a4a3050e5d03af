//! list_files tool - sandboxed recursive directory listing

use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::Path;
use walkdir::WalkDir;

use crate::domain::language_for_path;
use crate::tools::{Tool, ToolContext, ToolError};

/// List files under a directory, honoring the sandbox filters
pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &'static str {
        "list_files"
    }

    fn description(&self) -> &'static str {
        "List files under a directory (recursive). Blocked directories and oversized files are skipped."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory relative to the project root (default: '.')"
                },
                "max_files": {
                    "type": "integer",
                    "description": "Cap on returned entries (default: from config)"
                },
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern filter on file names, e.g. '*.py'"
                }
            }
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let path = input.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let cap = input
            .get("max_files")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(ctx.resource.max_files_per_scan);
        let pattern = input
            .get("pattern")
            .and_then(|v| v.as_str())
            .map(glob::Pattern::new)
            .transpose()
            .map_err(|e| ToolError::InvalidArgument(format!("Invalid glob pattern: {}", e)))?;

        let root = ctx.validate_path(Path::new(path))?;
        let blocked = ctx.security.blocked_directories.clone();
        let max_size = ctx.resource.max_file_size_bytes;
        let max_depth = ctx.security.max_path_depth;
        let project_root = ctx.project_root.clone();

        // Directory walking is blocking I/O; keep it off the async thread
        let listing = tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            let mut skipped = 0usize;
            let mut truncated = false;

            let walker = WalkDir::new(&root)
                .max_depth(max_depth)
                .follow_links(false)
                .into_iter()
                .filter_entry(|e| {
                    let name = e.file_name().to_string_lossy();
                    !(e.file_type().is_dir() && blocked.iter().any(|b| *b == name))
                });

            for entry in walker.flatten() {
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Some(pattern) = &pattern {
                    let name = entry.file_name().to_string_lossy();
                    if !pattern.matches(&name) {
                        continue;
                    }
                }
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                if size > max_size {
                    skipped += 1;
                    continue;
                }
                if files.len() >= cap {
                    truncated = true;
                    break;
                }
                let rel = entry
                    .path()
                    .strip_prefix(&project_root)
                    .unwrap_or(entry.path())
                    .to_string_lossy()
                    .to_string();
                files.push(json!({
                    "path": rel,
                    "size": size,
                    "language": language_for_path(&rel),
                }));
            }

            (files, skipped, truncated)
        })
        .await
        .map_err(|e| ToolError::External { message: e.to_string() })?;

        let (files, skipped, truncated) = listing;
        Ok(json!({
            "files": files,
            "total": files.len(),
            "skipped_oversized": skipped,
            "truncated": truncated,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_lists_files_with_language() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("main.py"), "x = 1").unwrap();
        fs::create_dir(temp.path().join("src")).unwrap();
        fs::write(temp.path().join("src/app.ts"), "let a;").unwrap();

        let ctx = ToolContext::new(temp.path().to_path_buf(), "t1");
        let data = ListFilesTool.execute(json!({}), &ctx).await.unwrap();

        assert_eq!(data["total"], 2);
        let langs: Vec<&str> = data["files"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["language"].as_str().unwrap())
            .collect();
        assert!(langs.contains(&"python"));
        assert!(langs.contains(&"typescript"));
    }

    #[tokio::test]
    async fn test_blocked_directories_skipped() {
        let temp = tempdir().unwrap();
        fs::create_dir(temp.path().join("node_modules")).unwrap();
        fs::write(temp.path().join("node_modules/dep.js"), "x").unwrap();
        fs::write(temp.path().join("app.js"), "y").unwrap();

        let ctx = ToolContext::new(temp.path().to_path_buf(), "t1");
        let data = ListFilesTool.execute(json!({}), &ctx).await.unwrap();

        assert_eq!(data["total"], 1);
        assert_eq!(data["files"][0]["path"], "app.js");
    }

    #[tokio::test]
    async fn test_cap_truncates() {
        let temp = tempdir().unwrap();
        for i in 0..5 {
            fs::write(temp.path().join(format!("f{}.py", i)), "").unwrap();
        }

        let ctx = ToolContext::new(temp.path().to_path_buf(), "t1");
        let data = ListFilesTool.execute(json!({"max_files": 3}), &ctx).await.unwrap();

        assert_eq!(data["total"], 3);
        assert_eq!(data["truncated"], true);
    }

    #[tokio::test]
    async fn test_pattern_filter() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("a.py"), "").unwrap();
        fs::write(temp.path().join("b.js"), "").unwrap();

        let ctx = ToolContext::new(temp.path().to_path_buf(), "t1");
        let data = ListFilesTool
            .execute(json!({"pattern": "*.py"}), &ctx)
            .await
            .unwrap();

        assert_eq!(data["total"], 1);
        assert_eq!(data["files"][0]["path"], "a.py");
    }

    #[tokio::test]
    async fn test_empty_directory() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "t1");
        let data = ListFilesTool.execute(json!({}), &ctx).await.unwrap();
        assert_eq!(data["total"], 0);
        assert_eq!(data["truncated"], false);
    }
}
