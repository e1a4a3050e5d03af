//! read_file tool - read file contents with line numbers

use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::Path;

use crate::tools::{Tool, ToolContext, ToolError};

/// Read a file's contents with line numbers
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> &'static str {
        "Read a file's contents with line numbers. Enforces the extension allowlist and size cap."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to the project root"
                },
                "offset": {
                    "type": "integer",
                    "description": "Line number to start reading from (1-indexed)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Max lines to read (default: 2000)"
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
        let offset = input.get("offset").and_then(|v| v.as_u64()).unwrap_or(1) as usize;
        let limit = input.get("limit").and_then(|v| v.as_u64()).unwrap_or(2_000) as usize;

        let full_path = ctx.validate_read_path(Path::new(path))?;

        let metadata = tokio::fs::metadata(&full_path).await?;
        if metadata.len() > ctx.resource.max_file_size_bytes {
            return Err(ToolError::InvalidArgument(format!(
                "File exceeds max size ({} > {} bytes)",
                metadata.len(),
                ctx.resource.max_file_size_bytes
            )));
        }

        let content = tokio::fs::read_to_string(&full_path).await?;

        let lines: Vec<String> = content
            .lines()
            .skip(offset.saturating_sub(1))
            .take(limit)
            .enumerate()
            .map(|(i, line)| {
                let line_num = offset + i;
                let display = if line.len() > 2_000 { &line[..2_000] } else { line };
                format!("{:>6}│{}", line_num, display)
            })
            .collect();

        Ok(json!({
            "path": path,
            "lines": content.lines().count(),
            "content": lines.join("\n"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_read_basic() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("test.py"), "a = 1\nb = 2\nc = 3").unwrap();

        let ctx = ToolContext::new(temp.path().to_path_buf(), "t1");
        let data = ReadFileTool.execute(json!({"path": "test.py"}), &ctx).await.unwrap();

        assert_eq!(data["lines"], 3);
        let content = data["content"].as_str().unwrap();
        assert!(content.contains("a = 1"));
        assert!(content.contains("c = 3"));
    }

    #[tokio::test]
    async fn test_offset_and_limit() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("test.py"), "l1\nl2\nl3\nl4").unwrap();

        let ctx = ToolContext::new(temp.path().to_path_buf(), "t1");
        let data = ReadFileTool
            .execute(json!({"path": "test.py", "offset": 2, "limit": 2}), &ctx)
            .await
            .unwrap();

        let content = data["content"].as_str().unwrap();
        assert!(!content.contains("│l1"));
        assert!(content.contains("l2"));
        assert!(content.contains("l3"));
        assert!(!content.contains("l4"));
    }

    #[tokio::test]
    async fn test_missing_file_errors() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "t1");

        let err = ReadFileTool
            .execute(json!({"path": "nope.py"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Io(_)));
    }

    #[tokio::test]
    async fn test_size_cap() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("big.py"), "x".repeat(2_048)).unwrap();

        let mut ctx = ToolContext::new(temp.path().to_path_buf(), "t1");
        ctx.resource.max_file_size_bytes = 1_024;

        let err = ReadFileTool
            .execute(json!({"path": "big.py"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_disallowed_extension() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("data.bin"), "").unwrap();

        let ctx = ToolContext::new(temp.path().to_path_buf(), "t1");
        let err = ReadFileTool
            .execute(json!({"path": "data.bin"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::SandboxViolation { .. }));
    }
}
