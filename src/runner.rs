use std::env;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tracing::debug;

use crate::diagnostics::Diagnostic;
use crate::interpreter::Interpreter;
use crate::modules::ScriptModule;
use crate::parser::Parser;
use crate::tokenizer::Tokenizer;

/// Loads and runs a script file, formatting any diagnostic to stderr.
///
/// Returns the process exit code: 0 on success, 1 when a diagnostic was
/// printed. I/O-level failures (missing file, unreadable directory) surface
/// as errors instead.
pub fn run_file(path: &Path, print_ast: bool, json: Option<&str>) -> Result<i32> {
    let module = ScriptModule::resolve(&path.to_string_lossy());
    let source = module
        .data()
        .with_context(|| format!("failed to read {}", module.display_path()))?;

    // Relative paths inside the script (imports, data files) resolve against
    // the script's own directory.
    if let Some(parent) = module.path().parent() {
        env::set_current_dir(parent)
            .with_context(|| format!("cannot enter {}", parent.display()))?;
    }

    debug!(script = %module.display_path(), "running script");

    let tokens = Tokenizer::new(&source).tokenize();
    let program = match Parser::new(tokens).parse() {
        Ok(program) => program,
        Err(err) => {
            let report = Diagnostic::from_syntax_error(&err).render(&module.display_path(), &source);
            eprint!("{}", report);
            return Ok(1);
        }
    };

    if print_ast {
        println!("{:#?}", program);
    }

    let mut interp = Interpreter::new();
    if let Err(err) = interp.run_program(&program) {
        let report = Diagnostic::from_runtime_error(&err).render(&module.display_path(), &source);
        eprint!("{}", report);
        return Ok(1);
    }

    if let Some(expr) = json {
        evaluate_expression_as_json(&mut interp, expr)?;
    }

    Ok(0)
}

/// `--json <expr>`: evaluate an expression against the finished script's
/// environment and print the result as JSON.
fn evaluate_expression_as_json(interp: &mut Interpreter, expr: &str) -> Result<()> {
    let tokens = Tokenizer::new(expr).tokenize();
    let expression = Parser::new(tokens)
        .parse_expression_only()
        .map_err(|err| anyhow!("expression parse error: {}", err))?;
    let value = interp
        .eval_expression(&expression)
        .map_err(|err| anyhow!("expression error: {}", err))?;
    println!("{}", value.to_json());
    Ok(())
}
