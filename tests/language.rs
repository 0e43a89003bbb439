// End-to-end scenarios: source in, stdout and diagnostics out.

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use radish::diagnostics::Diagnostic;
use radish::interpreter::{Interpreter, RuntimeError};
use radish::parser::Parser;
use radish::tokenizer::Tokenizer;
use radish::value::Value;

#[derive(Clone, Default)]
struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    fn contents(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).expect("output was not utf-8")
    }
}

fn run(source: &str) -> (Result<Value, RuntimeError>, String) {
    let buf = SharedBuf::default();
    let mut interp = Interpreter::with_output(Box::new(buf.clone()));
    let tokens = Tokenizer::new(source).tokenize();
    let program = Parser::new(tokens).parse().expect("parse failed");
    let result = interp.run_program(&program);
    (result, buf.contents())
}

fn run_ok(source: &str) -> String {
    let (result, output) = run(source);
    if let Err(err) = result {
        panic!("runtime error: {} at {:?}", err, err.span);
    }
    output
}

#[test]
fn arithmetic_expression_evaluates_like_the_repl() {
    let tokens = Tokenizer::new("1 + 2 * 3 - 4 / 2").tokenize();
    let expr = Parser::new(tokens).parse_expression_only().expect("parse");
    let mut interp = Interpreter::with_output(Box::new(Vec::new()));
    let value = interp.eval_expression(&expr).expect("eval");
    assert_eq!(value.to_string(), "5");
}

#[test]
fn closures_keep_private_state() {
    let source = r#"
        fun make() { var i = 0; fun inc() { i = i + 1; return i; } return inc; }
        var f = make(); println(f()); println(f()); println(f());
    "#;
    assert_eq!(run_ok(source), "1\n2\n3\n");
}

#[test]
fn two_closures_do_not_share_state() {
    let source = r#"
        fun make() { var i = 0; fun inc() { i = i + 1; return i; } return inc; }
        var a = make(); var b = make();
        println(a()); println(a()); println(b());
    "#;
    assert_eq!(run_ok(source), "1\n2\n1\n");
}

#[test]
fn while_with_continue_skips_an_iteration() {
    let source = r#"
        var s = 0; var i = 0;
        while (i < 5) { if (i == 2) { i = i + 1; continue; } s = s + i; i = i + 1; }
        println(s);
    "#;
    assert_eq!(run_ok(source), "8\n");
}

#[test]
fn defer_order_is_lifo() {
    let source = r#"defer println("a"); defer println("b"); println("c");"#;
    assert_eq!(run_ok(source), "c\nb\na\n");
}

#[test]
fn map_append_merges_and_counts_keys() {
    let source = r#"var m = {"k": 1, "v": 2}; m = append(m, {"w": 3}); println(len(m));"#;
    assert_eq!(run_ok(source), "3\n");
}

#[test]
fn division_by_zero_diagnostic_is_exact() {
    let source = "var x = 1 / 0;";
    let tokens = Tokenizer::new(source).tokenize();
    let program = Parser::new(tokens).parse().expect("parse");
    let mut interp = Interpreter::with_output(Box::new(Vec::new()));
    let err = interp.run_program(&program).expect_err("should fail");

    let report = Diagnostic::from_runtime_error(&err).render("a.rds", source);
    assert_eq!(
        report,
        "\na.rds:1:13 runtime error: divide by zero error\nvar x = 1 / 0;\n        ^^^^^\n"
    );
}

#[test]
fn iife_runs_in_place() {
    assert_eq!(run_ok("fun(x) { println(x * 2); }(21)"), "42\n");
}

#[test]
fn functions_are_first_class() {
    let source = r#"
        fun apply(f, x) { return f(x); }
        fun square(n) { return n * n; }
        println(apply(square, 9));
    "#;
    assert_eq!(run_ok(source), "81\n");
}

#[test]
fn nested_indexing_walks_collections() {
    let source = r#"
        var grid = [[1, 2], [3, 4]];
        println(grid[1][0]);
        var m = {"xs": [10, 20]};
        println(m["xs"][1]);
    "#;
    assert_eq!(run_ok(source), "3\n20\n");
}

#[test]
fn maps_print_in_insertion_order() {
    assert_eq!(
        run_ok(r#"println({"one": 1, "two": 2, "three": 3});"#),
        "{one:1, two:2, three:3}\n"
    );
}

#[test]
fn assert_stops_execution_with_the_expression_text() {
    let (result, output) = run(r#"println("before"); assert 1 > 2; println("after");"#);
    let err = result.expect_err("assert should fail");
    assert_eq!(err.message, "assert failed: 1 > 2");
    assert_eq!(output, "before\n");
}

#[test]
fn zen_prints_the_banner() {
    let output = run_ok("zen()");
    assert!(output.contains("The Zen of Radish"));
    assert!(output.contains("Rust is better than almost everything else."));
}

#[test]
fn numbers_print_without_trailing_zeroes() {
    assert_eq!(run_ok("println(10 / 4); println(10 / 5);"), "2.5\n2\n");
}

#[test]
fn booleans_and_nil_print_bare() {
    assert_eq!(
        run_ok("println(true); println(false); println(nil);"),
        "true\nfalse\nnil\n"
    );
}

#[test]
fn imported_module_runs_once() {
    use std::fs;

    let dir = std::env::temp_dir();
    let path = dir.join(format!("radish_import_test_{}.rds", std::process::id()));
    fs::write(&path, "var imported_marker = 41 + 1; println(\"loaded\");").expect("write module");

    let stem = path.with_extension("");
    let source = format!(
        "import(\"{0}\"); import(\"{0}\"); println(imported_marker);",
        stem.display()
    );
    let output = run_ok(&source);
    assert_eq!(output, "loaded\n42\n");

    fs::remove_file(&path).ok();
}

#[test]
fn missing_import_is_a_runtime_error() {
    let (result, _) = run("import(\"no_such_module_anywhere\");");
    let err = result.expect_err("import should fail");
    assert!(err.message.starts_with("cannot import"));
}

#[test]
fn deep_recursion_within_reason() {
    let source = r#"
        fun count(n) { if (n == 0) { return 0; } return 1 + count(n - 1); }
        println(count(100));
    "#;
    assert_eq!(run_ok(source), "100\n");
}

#[test]
fn string_truthiness_drives_conditions() {
    let source = r#"
        var name = "";
        println(name ? "named" : "anonymous");
        name = "radish";
        println(name ? "named" : "anonymous");
    "#;
    assert_eq!(run_ok(source), "anonymous\nnamed\n");
}
