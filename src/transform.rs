//! Transpiler Gateway + Import Rewriter: parses a single source file with
//! oxc, regenerates JS with an inline source map, and rewrites bare
//! specifiers to `/@modules/<dep>` URLs. No minifier, no bundling here —
//! that lives in `cache::PrebundleCache`'s scope-hoisting step.

use crate::utils::errors::{ErrorContext, SprigError};
use crate::utils::Result;
use once_cell::sync::Lazy;
use oxc_allocator::Allocator;
use oxc_codegen::{CodeGenerator, CodegenOptions, CodegenSourceMapOptions};
use oxc_parser::Parser;
use oxc_span::SourceType;
use regex::Regex;
use std::path::Path;

/// `from "X"` where X doesn't start with `.` or `/`. Captures the quote
/// character so the replacement preserves it.
static STATIC_IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"from\s+(['"])([^./'"][^'"]*)\1"#).unwrap()
});

/// `import("X")` where X doesn't start with `.` or `/`.
static DYNAMIC_IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"import\(\s*(['"])([^./'"][^'"]*)\1\s*\)"#).unwrap()
});

/// Rewrites bare specifiers to `/@modules/<specifier>` by text substitution
/// only — no AST required. Strings inside template literals are
/// intentionally not processed.
pub fn rewrite_bare_imports(source: &str) -> String {
    let rewritten = STATIC_IMPORT_RE.replace_all(source, |caps: &regex::Captures| {
        format!("from {q}/@modules/{spec}{q}", q = &caps[1], spec = &caps[2])
    });
    DYNAMIC_IMPORT_RE
        .replace_all(&rewritten, |caps: &regex::Captures| {
            format!("import({q}/@modules/{spec}{q})", q = &caps[1], spec = &caps[2])
        })
        .into_owned()
}

/// Every bare specifier a file imports, in source order (used by the
/// Prebundle Cache's direct-dependency-set walk).
pub fn scan_bare_imports(source: &str) -> Vec<String> {
    let mut found = Vec::new();
    for caps in STATIC_IMPORT_RE.captures_iter(source) {
        found.push(caps[2].to_string());
    }
    for caps in DYNAMIC_IMPORT_RE.captures_iter(source) {
        found.push(caps[2].to_string());
    }
    found
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loader {
    Js,
    Jsx,
    Ts,
    Tsx,
}

impl Loader {
    pub fn from_extension(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("js") => Some(Loader::Js),
            Some("jsx") => Some(Loader::Jsx),
            Some("ts") => Some(Loader::Ts),
            Some("tsx") => Some(Loader::Tsx),
            _ => None,
        }
    }

    fn source_type(self) -> SourceType {
        let base = SourceType::default().with_module(true);
        match self {
            Loader::Js => base,
            Loader::Jsx => base.with_jsx(true),
            Loader::Ts => base.with_typescript(true),
            Loader::Tsx => base.with_typescript(true).with_jsx(true),
        }
    }
}

/// Compiles JSX/TS to browser-executable JS with an inline source map,
/// targeting es2020.
pub struct TranspilerGateway;

impl TranspilerGateway {
    pub fn new() -> Self {
        Self
    }

    /// `source` must already have been through the Import Rewriter and the
    /// Plugin Host's `on_transform` chain.
    pub fn compile(&self, path: &Path, source: &str) -> Result<String> {
        let loader = Loader::from_extension(path)
            .ok_or_else(|| SprigError::transform(format!("no loader for {}", path.display())))?;

        let allocator = Allocator::default();
        let source_type = loader.source_type();
        let parser_result = Parser::new(&allocator, source, source_type).parse();

        if !parser_result.errors.is_empty() {
            let message = parser_result
                .errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SprigError::transform_with_context(
                message,
                ErrorContext::new().with_file(path.to_path_buf()),
            ));
        }

        let codegen_options = CodegenOptions {
            source_map_path: Some(path.to_path_buf()),
            ..CodegenOptions::default()
        };

        let result = CodeGenerator::new()
            .with_options(codegen_options)
            .build(&parser_result.program);

        let mut code = result.source_text;
        if let Some(source_map) = result.source_map {
            let json = source_map.to_json_string();
            let encoded = base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                json.as_bytes(),
            );
            code.push_str(&format!(
                "\n//# sourceMappingURL=data:application/json;base64,{}\n",
                encoded
            ));
        }

        Ok(code)
    }
}

impl Default for TranspilerGateway {
    fn default() -> Self {
        Self::new()
    }
}

/// Built-in `.css` handling: instead of running the transpiler on CSS text,
/// produce a runtime snippet that installs a `<style>` element. This is not
/// routed through `TranspilerGateway::compile` — the output is already
/// valid JS.
pub fn css_hot_reload_module(css: &str) -> String {
    let escaped = css.replace('\\', "\\\\").replace('`', "\\`").replace("${", "\\${");
    format!(
        "const __sprigStyle = document.createElement('style');\n\
         __sprigStyle.textContent = `{escaped}`;\n\
         document.head.appendChild(__sprigStyle);\n\
         export default {{}};\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_static_bare_import_only() {
        let input = r#"import React from "react";
import App from "./App";
import { x } from '@scope/pkg/sub';"#;
        let output = rewrite_bare_imports(input);
        assert!(output.contains(r#"from "/@modules/react""#));
        assert!(output.contains(r#"from "./App""#));
        assert!(output.contains("from '/@modules/@scope/pkg/sub'"));
    }

    #[test]
    fn rewrites_dynamic_bare_import_only() {
        let input = r#"import("lodash"); import("./local.js");"#;
        let output = rewrite_bare_imports(input);
        assert!(output.contains(r#"import("/@modules/lodash")"#));
        assert!(output.contains(r#"import("./local.js")"#));
    }

    #[test]
    fn scan_collects_both_static_and_dynamic_specifiers() {
        let input = r#"import x from "react"; const y = import("react-dom/client");"#;
        let found = scan_bare_imports(input);
        assert_eq!(found, vec!["react", "react-dom/client"]);
    }

    #[test]
    fn css_module_embeds_literal_and_style_injection() {
        let js = css_hot_reload_module(".a { color: red; }");
        assert!(js.contains("document.createElement('style')"));
        assert!(js.contains(".a { color: red; }"));
    }

    #[test]
    fn compiles_tsx_to_javascript() {
        let gateway = TranspilerGateway::new();
        let source = "export function App() { return <div>hi</div>; }";
        let out = gateway.compile(Path::new("src/App.tsx"), source).unwrap();
        assert!(out.contains("sourceMappingURL"));
    }
}
