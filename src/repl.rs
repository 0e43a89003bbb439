use std::io::{self, BufRead, Write};

use crate::ast::{Expr, Program, StmtKind};
use crate::build_info;
use crate::diagnostics::Diagnostic;
use crate::interpreter::Interpreter;
use crate::parser::Parser;
use crate::tokenizer::Tokenizer;

const LOGO: &str = r#"
______  ___ ______ _____ _____ _   _
| ___ \/ _ \|  _  \_   _/  ___| | | |
| |_/ / /_\ \ | | | | | \ `--.| |_| |
|    /|  _  | | | | | |  `--. \  _  |
| |\ \| | | | |/ / _| |_/\__/ / | | |
\_| \_\_| |_/___/  \___/\____/\_| |_/
"#;

const PROMPT: &str = "radish >>> ";

/// Line-oriented read-eval-print loop. One interpreter lives for the whole
/// session, so definitions carry over between lines. A line holding a single
/// expression statement echoes its value unless it is nil.
pub struct Repl {
    interp: Interpreter,
}

impl Default for Repl {
    fn default() -> Self {
        Self::new()
    }
}

impl Repl {
    pub fn new() -> Self {
        Self::with_interpreter(Interpreter::new())
    }

    pub fn with_interpreter(interp: Interpreter) -> Self {
        Self { interp }
    }

    /// Runs against standard input and output.
    pub fn run(&mut self) -> io::Result<()> {
        let stdin = io::stdin();
        let mut reader = stdin.lock();
        let stdout = io::stdout();
        let mut writer = stdout.lock();
        self.run_with(&mut reader, &mut writer)
    }

    /// Runs against the supplied streams; tests drive this with buffers.
    pub fn run_with<R: BufRead, W: Write>(
        &mut self,
        reader: &mut R,
        writer: &mut W,
    ) -> io::Result<()> {
        writeln!(writer, "{}", LOGO)?;
        write!(writer, "{}", build_info::info())?;

        let mut line = String::new();
        loop {
            write!(writer, "{}", PROMPT)?;
            writer.flush()?;

            line.clear();
            if reader.read_line(&mut line)? == 0 {
                writeln!(writer)?;
                return Ok(());
            }

            let input = line.trim_end_matches(['\n', '\r']);
            if input.trim().is_empty() {
                continue;
            }
            if input == "bye" || input == "quit" {
                return Ok(());
            }

            self.eval_line(input, writer)?;
        }
    }

    fn eval_line<W: Write>(&mut self, input: &str, writer: &mut W) -> io::Result<()> {
        let tokens = Tokenizer::new(input).tokenize();
        let program = match Parser::new(tokens).parse() {
            Ok(program) => program,
            Err(err) => {
                let report = Diagnostic::from_syntax_error(&err).render("<repl>", input);
                write!(writer, "{}", report)?;
                return Ok(());
            }
        };

        match single_expression(&program) {
            Some(expr) => match self.interp.eval_expression(expr) {
                Ok(value) => {
                    if value != crate::value::Value::Nil {
                        writeln!(writer, "{}", value)?;
                    }
                }
                Err(err) => {
                    let report = Diagnostic::from_runtime_error(&err).render("<repl>", input);
                    write!(writer, "{}", report)?;
                }
            },
            None => {
                if let Err(err) = self.interp.run_program(&program) {
                    let report = Diagnostic::from_runtime_error(&err).render("<repl>", input);
                    write!(writer, "{}", report)?;
                }
            }
        }
        Ok(())
    }
}

/// A program consisting of exactly one expression statement is echoed rather
/// than just executed.
fn single_expression(program: &Program) -> Option<&Expr> {
    match program.declarations.as_slice() {
        [stmt] => match &stmt.kind {
            StmtKind::Expr(expr) => Some(expr),
            _ => None,
        },
        _ => None,
    }
}
