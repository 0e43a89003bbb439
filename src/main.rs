use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::Parser as ClapParser;
use tracing_subscriber::EnvFilter;

use radish::{build_info, repl::Repl, runner};

//=============================================
//            Section 1: CLI Definition
//=============================================

#[derive(Debug, ClapParser)]
#[command(
    name = "radish",
    about = "Runs Radish scripts or starts an interactive session.",
    disable_version_flag = true
)]
struct Args {
    /// Script to execute; without one an interactive session starts.
    script: Option<PathBuf>,

    /// Print build information and exit.
    #[arg(short = 'v', long = "version")]
    version: bool,

    /// Pretty-print the parsed AST before execution.
    #[arg(long)]
    print_ast: bool,

    /// Evaluate an expression after the script finishes and print the JSON
    /// result.
    #[arg(long)]
    json: Option<String>,
}

//=============================================
//            Section 2: Entry Point
//=============================================

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();

    let args = Args::parse();

    if args.version {
        print!("{}", build_info::info());
        return Ok(());
    }

    match &args.script {
        Some(script) => {
            let code = runner::run_file(script, args.print_ast, args.json.as_deref())?;
            if code != 0 {
                process::exit(code);
            }
            Ok(())
        }
        None => {
            let mut repl = Repl::new();
            repl.run()?;
            Ok(())
        }
    }
}
