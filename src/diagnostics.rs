use crate::interpreter::RuntimeError;
use crate::parser::SyntaxError;
use crate::tokenizer::Span;

/// A user-facing error report: one header line with the path and position,
/// the offending source line, and a caret underline.
///
/// ```text
/// a.rds:1:13 runtime error: divide by zero error
/// var x = 1 / 0
///         ^^^^^
/// ```
#[derive(Debug)]
pub struct Diagnostic {
    kind: &'static str,
    message: String,
    span: Span,
}

impl Diagnostic {
    pub fn from_syntax_error(err: &SyntaxError) -> Self {
        Self {
            kind: "syntax",
            message: err.to_string(),
            span: err.span(),
        }
    }

    /// Runtime errors unwind through their cause chain so the caret points
    /// at the innermost fault site, not the outermost call.
    pub fn from_runtime_error(err: &RuntimeError) -> Self {
        let inner = err.innermost();
        Self {
            kind: "runtime",
            message: inner.message.clone(),
            span: inner.span,
        }
    }

    pub fn render(&self, path: &str, source: &str) -> String {
        let mut lines: Vec<&str> = source.split('\n').collect();
        // Errors on the final line still need a line to underline.
        lines.push("");

        let end = self.span.end;
        let line_index = (end.line.max(1) as usize - 1).min(lines.len() - 1);

        let mut out = String::new();
        out.push('\n');
        out.push_str(&format!(
            "{}:{}:{} {} error: {}\n",
            path, end.line, end.column, self.kind, self.message
        ));
        out.push_str(lines[line_index]);
        out.push('\n');
        out.push_str(&self.arrows());
        out.push('\n');
        out
    }

    fn arrows(&self) -> String {
        let begin_col = self.span.begin.column as usize;
        let end_col = self.span.end.column as usize;
        if begin_col < end_col {
            let mut underline = " ".repeat(begin_col.saturating_sub(1));
            underline.push_str(&"^".repeat(end_col - begin_col + 1));
            underline
        } else {
            "^".repeat(end_col + 1)
        }
    }
}
