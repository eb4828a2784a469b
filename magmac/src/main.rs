//! Magma Compiler CLI

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use magmac::error::report_error;

#[derive(Parser)]
#[command(name = "magmac", version, about = "Magma Compiler - typed programs to C")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a Magma source file to a C file
    Build {
        /// Source file to compile
        file: PathBuf,
        /// Output path; defaults to the input with a .c extension
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Compile and print the C output to stdout
    Emit {
        /// Source file to compile
        file: PathBuf,
    },
    /// Check a Magma source file without writing output
    Check {
        /// Source file to check
        file: PathBuf,
    },
    /// Parse and dump AST (debug)
    Parse {
        /// Source file to parse
        file: PathBuf,
    },
    /// Tokenize and dump tokens (debug)
    Tokens {
        /// Source file to tokenize
        file: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Build { file, output } => build_file(&file, output),
        Command::Emit { file } => emit_file(&file),
        Command::Check { file } => check_file(&file),
        Command::Parse { file } => parse_file(&file),
        Command::Tokens { file } => tokenize_file(&file),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Run the pipeline; compile errors are reported with their source span
/// and end the process
fn compile_or_exit(path: &PathBuf) -> Result<String, Box<dyn std::error::Error>> {
    let source = std::fs::read_to_string(path)?;
    let filename = path.display().to_string();

    match magmac::compile_checked(&source) {
        Ok(output) => Ok(output),
        Err(err) => {
            report_error(&filename, &source, &err);
            std::process::exit(1);
        }
    }
}

fn build_file(path: &PathBuf, output: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let c_text = compile_or_exit(path)?;
    let out_path = output.unwrap_or_else(|| path.with_extension("c"));
    std::fs::write(&out_path, c_text)?;

    println!("✓ wrote {}", out_path.display());
    Ok(())
}

fn emit_file(path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let c_text = compile_or_exit(path)?;
    print!("{c_text}");
    Ok(())
}

fn check_file(path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    compile_or_exit(path)?;
    println!("✓ {} compiles successfully", path.display());
    Ok(())
}

fn parse_file(path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let source = std::fs::read_to_string(path)?;
    let filename = path.display().to_string();

    let tokens = match magmac::lexer::tokenize(&source) {
        Ok(tokens) => tokens,
        Err(err) => {
            report_error(&filename, &source, &err);
            std::process::exit(1);
        }
    };
    let ast = match magmac::parser::parse(tokens) {
        Ok(ast) => ast,
        Err(err) => {
            report_error(&filename, &source, &err);
            std::process::exit(1);
        }
    };

    println!("{}", serde_json::to_string_pretty(&ast)?);
    Ok(())
}

fn tokenize_file(path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let source = std::fs::read_to_string(path)?;
    let filename = path.display().to_string();

    let tokens = match magmac::lexer::tokenize(&source) {
        Ok(tokens) => tokens,
        Err(err) => {
            report_error(&filename, &source, &err);
            std::process::exit(1);
        }
    };
    for (tok, span) in &tokens {
        println!("{:?} @ {}..{}", tok, span.start, span.end);
    }

    Ok(())
}
