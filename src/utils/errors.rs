use std::path::PathBuf;
use thiserror::Error;

/// Enhanced error with file location context
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub file_path: Option<PathBuf>,
    pub line: Option<usize>,
    pub column: Option<usize>,
    pub code_snippet: Option<String>,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            file_path: None,
            line: None,
            column: None,
            code_snippet: None,
        }
    }

    pub fn with_file(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    pub fn with_location(mut self, line: usize, column: usize) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    pub fn with_snippet(mut self, snippet: String) -> Self {
        self.code_snippet = Some(snippet);
        self
    }
}

/// Error taxonomy for the dev server core.
#[derive(Error, Debug)]
pub enum SprigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to resolve module {specifier}: {reason}")]
    Resolve { specifier: String, reason: String },

    #[error("Transform error: {message}")]
    Transform {
        message: String,
        context: Option<ErrorContext>,
    },

    #[error("Bundle error for {specifier}: {reason}")]
    Bundle { specifier: String, reason: String },

    #[error("Invalid request: {0}")]
    Protocol(String),

    #[error("{0}")]
    Other(String),
}

impl SprigError {
    pub fn resolve(specifier: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Resolve {
            specifier: specifier.into(),
            reason: reason.to_string(),
        }
    }

    pub fn transform(message: impl Into<String>) -> Self {
        Self::Transform {
            message: message.into(),
            context: None,
        }
    }

    pub fn transform_with_context(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::Transform {
            message: message.into(),
            context: Some(context),
        }
    }

    pub fn bundle(specifier: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Bundle {
            specifier: specifier.into(),
            reason: reason.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Render as a JavaScript comment so it is safe to return as the body of
    /// a route that the browser expects to parse as a module.
    pub fn as_js_comment(&self) -> String {
        let single_line = self.to_string().replace("\r\n", " ").replace('\n', " ");
        format!("// {}", single_line)
    }

    /// Multi-line, human-facing rendering used by the CLI and the overlay
    /// hot-update broadcast.
    pub fn format_detailed(&self) -> String {
        match self {
            SprigError::Transform { message, context } => {
                self.format_with_context("Transform Error", message, context)
            }
            _ => self.to_string(),
        }
    }

    fn format_with_context(
        &self,
        kind: &str,
        message: &str,
        context: &Option<ErrorContext>,
    ) -> String {
        let mut output = format!("{}: {}", kind, message);

        if let Some(ctx) = context {
            if let Some(ref file_path) = ctx.file_path {
                output.push_str(&format!("\n  at {}", file_path.display()));
            }
            if let (Some(line), Some(column)) = (ctx.line, ctx.column) {
                output.push_str(&format!(":{}:{}", line, column));
            }
            if let Some(ref snippet) = ctx.code_snippet {
                output.push_str(&format!("\n{}", snippet));
            }
        }

        output
    }
}

pub type Result<T> = std::result::Result<T, SprigError>;

impl From<regex::Error> for SprigError {
    fn from(err: regex::Error) -> Self {
        SprigError::Other(format!("regex error: {}", err))
    }
}

impl From<serde_json::Error> for SprigError {
    fn from(err: serde_json::Error) -> Self {
        SprigError::Other(format!("json error: {}", err))
    }
}

impl From<anyhow::Error> for SprigError {
    fn from(err: anyhow::Error) -> Self {
        SprigError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_error_renders_as_js_comment() {
        let err = SprigError::resolve("does-not-exist", "no package.json found");
        let comment = err.as_js_comment();
        assert!(comment.starts_with("// "));
        assert!(comment.contains("does-not-exist"));
        assert!(!comment.contains('\n'));
    }
}
