//! Textual rewriting of bare import specifiers.
//!
//! Served project sources must not contain bare specifiers; the browser
//! cannot resolve them. Two production patterns are rewritten to routed
//! URLs under `/@modules/`:
//!
//! - `from "X"` where `X` does not start with `.` or `/`
//! - `import("X")` where `X` does not start with `.` or `/`
//!
//! The rewrite operates on raw text with compiled-once regexes; no AST is
//! built. Specifiers inside template literals are left alone.

use regex::Regex;
use std::sync::LazyLock;

/// Matches the `from "X"` clause of static imports and re-exports.
static STATIC_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"from\s*(['"])([^'"./][^'"]*)(['"])"#).expect("static import pattern")
});

/// Matches dynamic `import("X")` calls.
static DYNAMIC_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"import\s*\(\s*(['"])([^'"./][^'"]*)(['"])\s*\)"#)
        .expect("dynamic import pattern")
});

/// URL prefix bare specifiers are routed under.
pub const MODULE_URL_PREFIX: &str = "/@modules/";

/// Collect every bare specifier named by the two production import
/// patterns in `code`, in order of appearance.
pub fn collect_bare_specifiers(code: &str) -> Vec<String> {
    let mut specifiers = Vec::new();
    for caps in STATIC_IMPORT_RE.captures_iter(code) {
        specifiers.push(caps[2].to_string());
    }
    for caps in DYNAMIC_IMPORT_RE.captures_iter(code) {
        specifiers.push(caps[2].to_string());
    }
    specifiers
}

/// Collect relative specifiers (`./x`, `../x`) so the dependency walk can
/// follow the project graph without parsing.
pub fn collect_relative_specifiers(code: &str) -> Vec<String> {
    static RELATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"(?:from\s*|import\s*\(\s*)(['"])(\.[^'"]*)['"]"#)
            .expect("relative import pattern")
    });
    RELATIVE_RE
        .captures_iter(code)
        .map(|caps| caps[2].to_string())
        .collect()
}

/// Rewrite every bare specifier in `code` to its `/@modules/` URL.
///
/// Quote style is preserved; relative and absolute specifiers pass
/// through untouched.
pub fn rewrite_bare_imports(code: &str) -> String {
    let pass = STATIC_IMPORT_RE.replace_all(code, |caps: &regex::Captures<'_>| {
        format!("from {q}{prefix}{spec}{q}", q = &caps[1], prefix = MODULE_URL_PREFIX, spec = &caps[2])
    });
    DYNAMIC_IMPORT_RE
        .replace_all(&pass, |caps: &regex::Captures<'_>| {
            format!("import({q}{prefix}{spec}{q})", q = &caps[1], prefix = MODULE_URL_PREFIX, spec = &caps[2])
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrites_static_import() {
        let code = r#"import React from "react";"#;
        assert_eq!(
            rewrite_bare_imports(code),
            r#"import React from "/@modules/react";"#
        );
    }

    #[test]
    fn test_rewrites_scoped_and_subpath_specifiers() {
        let code = "import { createRoot } from \"react-dom/client\";\nimport icons from '@acme/icons';";
        let out = rewrite_bare_imports(code);
        assert!(out.contains(r#"from "/@modules/react-dom/client""#));
        assert!(out.contains("from '/@modules/@acme/icons'"));
    }

    #[test]
    fn test_rewrites_dynamic_import() {
        let code = r#"const mod = await import("lodash-es");"#;
        assert_eq!(
            rewrite_bare_imports(code),
            r#"const mod = await import("/@modules/lodash-es");"#
        );
    }

    #[test]
    fn test_leaves_relative_and_absolute_imports() {
        let code = "import App from \"./App\";\nimport base from \"/src/base.ts\";\nimport(\"./lazy\");";
        assert_eq!(rewrite_bare_imports(code), code);
    }

    #[test]
    fn test_preserves_quote_style() {
        let code = "import x from 'react';";
        assert_eq!(rewrite_bare_imports(code), "import x from '/@modules/react';");
    }

    #[test]
    fn test_backtick_specifiers_untouched() {
        let code = "const mod = await import(`react`);";
        assert_eq!(rewrite_bare_imports(code), code);
    }

    #[test]
    fn test_collect_bare_specifiers() {
        let code = r#"
import React from "react";
import App from "./App";
import("react-dom/client");
import("../outside");
"#;
        let found = collect_bare_specifiers(code);
        assert_eq!(found, vec!["react", "react-dom/client"]);
    }

    #[test]
    fn test_collect_relative_specifiers() {
        let code = r#"
import App from "./App";
import { helper } from "../lib/helper";
import React from "react";
const lazy = () => import("./routes/About");
"#;
        let found = collect_relative_specifiers(code);
        assert_eq!(found, vec!["./App", "../lib/helper", "./routes/About"]);
    }

    #[test]
    fn test_export_from_clause_rewritten() {
        let code = r#"export { useState } from "react";"#;
        assert_eq!(
            rewrite_bare_imports(code),
            r#"export { useState } from "/@modules/react";"#
        );
    }

    #[test]
    fn test_no_token_left_behind() {
        let code = r#"
import React from "react";
import { createRoot } from "react-dom/client";
import App from "./App";
const lazy = () => import("canvas-confetti");
"#;
        let out = rewrite_bare_imports(code);
        assert_eq!(STATIC_IMPORT_RE.captures_iter(&out).count(), 0);
        assert_eq!(DYNAMIC_IMPORT_RE.captures_iter(&out).count(), 0);
        assert!(out.contains("/@modules/canvas-confetti"));
    }
}
