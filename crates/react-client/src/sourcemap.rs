//! Original-source snippet endpoint backing the error overlay.
//!
//! Given a file path and a line number interpreted against the original
//! source (not the transformed artifact), returns a short, HTML-escaped
//! context window. Inline source maps embedded by the transpiler are
//! decoded by the browser itself, never here.

use serde::Deserialize;
use std::path::Path;

/// Lines of context above the requested line.
const CONTEXT_BEFORE: usize = 3;
/// Lines of context below the requested line.
const CONTEXT_AFTER: usize = 2;

/// Query parameters of `GET /@source-map`.
#[derive(Debug, Default, Deserialize)]
pub struct SnippetQuery {
    pub file: Option<String>,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl SnippetQuery {
    /// Build from raw query parameters. A present but non-numeric `line`
    /// or `column` is a malformed request, not a silent default.
    pub fn from_params(
        params: &std::collections::HashMap<String, String>,
    ) -> Result<Self, SnippetError> {
        let parse_number = |key: &str| -> Result<Option<usize>, SnippetError> {
            match params.get(key) {
                Some(value) => value
                    .parse()
                    .map(Some)
                    .map_err(|_| SnippetError::BadRequest),
                None => Ok(None),
            }
        };
        Ok(Self {
            file: params.get("file").cloned(),
            line: parse_number("line")?,
            column: parse_number("column")?,
        })
    }
}

/// A located snippet ready for JSON encoding.
#[derive(Debug, PartialEq, Eq)]
pub struct Snippet {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub snippet: String,
}

/// Why a snippet lookup produced no snippet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnippetError {
    /// The query was malformed (missing `file`, traversal attempt).
    BadRequest,
    /// The named file does not exist under the project root.
    NotFound,
}

/// Look up the context window for a query against `root_dir`.
pub fn lookup_snippet(root_dir: &Path, query: &SnippetQuery) -> Result<Snippet, SnippetError> {
    let Some(file) = query.file.as_deref().filter(|f| !f.is_empty()) else {
        return Err(SnippetError::BadRequest);
    };
    let relative = file.trim_start_matches('/');
    if relative.split('/').any(|seg| seg == "..") {
        return Err(SnippetError::BadRequest);
    }
    let path = root_dir.join(relative);
    let Ok(text) = std::fs::read_to_string(&path) else {
        return Err(SnippetError::NotFound);
    };

    let line = query.line.unwrap_or(1).max(1);
    Ok(Snippet {
        file: file.to_string(),
        line,
        column: query.column.unwrap_or(0),
        snippet: build_snippet(&text, line),
    })
}

/// Render lines `[line - 3, line + 2]` (clamped to the file) with `<` and
/// `>` escaped and a line-number span prefixed to each.
pub fn build_snippet(text: &str, line: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = line.saturating_sub(1 + CONTEXT_BEFORE).min(lines.len());
    let end = (line + CONTEXT_AFTER).min(lines.len());

    lines[start..end]
        .iter()
        .enumerate()
        .map(|(offset, content)| {
            let number = start + offset + 1;
            let escaped = content.replace('<', "&lt;").replace('>', "&gt;");
            format!(r#"<span class="line-number">{number}</span> {escaped}"#)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_window_is_clamped_to_file_bounds() {
        let text = "line1\nline2\nline3\nline4\nline5\n";
        let snippet = build_snippet(text, 3);
        let rendered: Vec<&str> = snippet.lines().collect();
        assert_eq!(rendered.len(), 5);
        assert!(rendered[0].contains(">1</span> line1"));
        assert!(rendered[4].contains(">5</span> line5"));
    }

    #[test]
    fn test_one_line_file_yields_exactly_that_line() {
        let snippet = build_snippet("const x = 1;\n", 1);
        assert_eq!(
            snippet,
            r#"<span class="line-number">1</span> const x = 1;"#
        );
    }

    #[test]
    fn test_angle_brackets_escaped() {
        let snippet = build_snippet("return <div>hi</div>;\n", 1);
        assert!(snippet.contains("&lt;div&gt;hi&lt;/div&gt;"));
        assert!(!snippet.contains("<div>"));
    }

    #[test]
    fn test_deep_line_window() {
        let text = (1..=20).map(|n| format!("l{n}")).collect::<Vec<_>>().join("\n");
        let snippet = build_snippet(&text, 10);
        let rendered: Vec<&str> = snippet.lines().collect();
        assert_eq!(rendered.len(), 6);
        assert!(rendered[0].contains(">7</span> l7"));
        assert!(rendered[5].contains(">12</span> l12"));
    }

    #[test]
    fn test_lookup_missing_file_param_is_bad_request() {
        let temp = TempDir::new().unwrap();
        let err = lookup_snippet(temp.path(), &SnippetQuery::default()).unwrap_err();
        assert_eq!(err, SnippetError::BadRequest);
    }

    #[test]
    fn test_lookup_unknown_file_is_not_found() {
        let temp = TempDir::new().unwrap();
        let query = SnippetQuery {
            file: Some("/src/missing.ts".to_string()),
            line: Some(1),
            column: Some(0),
        };
        let err = lookup_snippet(temp.path(), &query).unwrap_err();
        assert_eq!(err, SnippetError::NotFound);
    }

    #[test]
    fn test_lookup_reads_project_file() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("x.ts"), "line1\nline2\nline3\nline4\nline5\n").unwrap();

        let query = SnippetQuery {
            file: Some("/src/x.ts".to_string()),
            line: Some(3),
            column: Some(0),
        };
        let snippet = lookup_snippet(temp.path(), &query).unwrap();
        assert_eq!(snippet.file, "/src/x.ts");
        assert_eq!(snippet.line, 3);
        assert_eq!(snippet.snippet.lines().count(), 5);
    }

    #[test]
    fn test_query_from_params() {
        let mut params = std::collections::HashMap::new();
        params.insert("file".to_string(), "/src/x.ts".to_string());
        params.insert("line".to_string(), "3".to_string());
        params.insert("column".to_string(), "7".to_string());

        let query = SnippetQuery::from_params(&params).unwrap();
        assert_eq!(query.file.as_deref(), Some("/src/x.ts"));
        assert_eq!(query.line, Some(3));
        assert_eq!(query.column, Some(7));

        params.insert("line".to_string(), "abc".to_string());
        assert_eq!(
            SnippetQuery::from_params(&params).unwrap_err(),
            SnippetError::BadRequest
        );
    }

    #[test]
    fn test_lookup_rejects_traversal() {
        let temp = TempDir::new().unwrap();
        let query = SnippetQuery {
            file: Some("/../secrets.txt".to_string()),
            line: Some(1),
            column: Some(0),
        };
        assert_eq!(
            lookup_snippet(temp.path(), &query).unwrap_err(),
            SnippetError::BadRequest
        );
    }
}
