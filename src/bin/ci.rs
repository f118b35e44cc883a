use anyhow::{Context, Result};
use ci::{
    bytecode::Parser,
    lexer::Lexer,
    memory::{Memory, DEFAULT_CAPACITY},
    token::TokenKind,
    vm::Vm,
};
use clap::{App, Arg, ArgMatches};
use log::{error, info};
use std::{
    env,
    fs::{self, File},
    io::{self, BufRead, BufWriter, Write},
    process,
};

const PROMPT: &str = "CI> ";

fn args() -> ArgMatches {
    App::new("ci")
        .about("an interpreter for a small register-machine assembly language")
        .version("0.1.0")
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .takes_value(true)
                .required(false)
                .help("source file to run, a REPL starts when no arguments are given"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .takes_value(true)
                .required(false)
                .help("write all output to this file instead of stdout"),
        )
        .arg(
            Arg::new("lex")
                .short('l')
                .long("lex")
                .takes_value(false)
                .required(false)
                .help("prints the tokens of the program before running it"),
        )
        .arg(
            Arg::new("parse")
                .short('p')
                .long("parse")
                .takes_value(false)
                .required(false)
                .help("prints the parsed instructions and labels before running them"),
        )
        .arg(
            Arg::new("memory-size")
                .short('m')
                .long("memory-size")
                .takes_value(true)
                .required(false)
                .help("size of the memory in bytes"),
        )
        .get_matches()
}

fn main() -> Result<()> {
    env_logger::init();

    let args = args();
    let capacity = match args.value_of("memory-size") {
        Some(size) => size
            .parse()
            .with_context(|| format!("invalid memory size '{}'", size))?,
        None => DEFAULT_CAPACITY,
    };

    let mut out: Box<dyn Write> = match args.value_of("output") {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {}", path))?,
        )),
        None => Box::new(io::stdout()),
    };

    let arg_count = env::args_os().len().saturating_sub(1);
    let program = match source(arg_count, args.value_of("input")) {
        Source::File(path) => {
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path))?
        }
        Source::Repl => read_repl(&mut out)?,
        Source::Missing => {
            writeln!(out, "No file specified.")?;
            out.flush()?;
            process::exit(1);
        }
    };

    let success = run_program(
        &program,
        capacity,
        args.is_present("lex"),
        args.is_present("parse"),
        &mut out,
    )?;
    out.flush()?;

    if !success {
        process::exit(1);
    }
    Ok(())
}

/// Where the program is read from
#[derive(Debug, Eq, PartialEq)]
enum Source<'a> {
    File(&'a str),
    Repl,
    Missing,
}

/// The REPL only starts when no arguments are given at all.
fn source(arg_count: usize, input: Option<&str>) -> Source<'_> {
    match input {
        Some(path) => Source::File(path),
        None if arg_count == 0 => Source::Repl,
        None => Source::Missing,
    }
}

/// Read lines until one does not end with `;`
fn read_repl(out: &mut dyn Write) -> Result<String> {
    writeln!(out, "Enter commands:")?;

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let mut program = String::new();

    loop {
        write!(out, "{}", PROMPT)?;
        out.flush()?;

        let line = match lines.next() {
            Some(line) => line?,
            None => break,
        };
        program.push_str(&line);
        program.push('\n');

        if !line.trim_end().ends_with(';') {
            break;
        }
    }

    Ok(program)
}

/// Returns whether the program was parsed and ran without errors.
fn run_program(
    program: &str,
    capacity: usize,
    print_lex: bool,
    print_parse: bool,
    out: &mut dyn Write,
) -> Result<bool> {
    if print_lex {
        print_tokens(program, out)?;
    }

    let bytecode = match Parser::new(program).parse() {
        Ok(bytecode) => bytecode,
        Err(failure) => {
            error!("parse failed: {}", failure);
            writeln!(out, "Parser encountered an error:")?;
            writeln!(out, "At {}", failure.error)?;
            writeln!(out, "Parsed commands up to this point:")?;
            write!(out, "{}", failure.partial)?;
            return Ok(false);
        }
    };
    if print_parse {
        write!(out, "{}", bytecode)?;
    }

    let mut memory = Memory::with_capacity(capacity);
    let mut vm = Vm::new(bytecode, &mut memory);
    if let Err(err) = vm.run(&mut *out) {
        error!("run failed: {}", err);
        writeln!(out, "Runtime error: {}", err)?;
    }
    info!("program finished, had error: {}", vm.had_error());

    write!(out, "{}", vm)?;
    let success = !vm.had_error();
    drop(vm);
    write!(out, "{}", memory)?;

    Ok(success)
}

/// Print every token up to the end of input or the first lexical error
fn print_tokens(program: &str, out: &mut dyn Write) -> Result<()> {
    for token in Lexer::new(program) {
        writeln!(out, "{}", token)?;
        if let TokenKind::Error(_) = token.kind {
            break;
        }
    }
    Ok(())
}
