mod ast;
mod driver;
mod emulator;
mod error;
mod generator;
mod instruction;
mod linker;
mod natives;
mod optimizer;
mod options;
mod parser;
mod scope;
mod source;
mod types;
mod value;

use std::{path::PathBuf, process::exit};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use emulator::{Config, Device};
use options::Options;
use source::Sources;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Log every compiler phase.
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(clap::Args, Debug)]
struct CompileArgs {
    /// Source files, linked in the given order. `.mlog` files are included
    /// as-is.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    #[arg(long)]
    no_optimize: bool,

    #[arg(long, default_value_t = Options::default().max_rounds)]
    max_rounds: usize,

    #[arg(long, default_value_t = Options::default().unroll_limit)]
    unroll_limit: usize,
}

impl CompileArgs {
    fn options(&self) -> Options {
        Options {
            optimize: !self.no_optimize,
            max_rounds: self.max_rounds,
            unroll_limit: self.unroll_limit,
        }
    }

    fn build(&self) -> anyhow::Result<String> {
        let mut sources = Sources::default();
        for path in &self.files {
            sources.load(path)?;
        }
        driver::build(&sources, &self.options())
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile to mlog text.
    Build {
        #[command(flatten)]
        compile: CompileArgs,
        /// Write here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Compile, then execute in the emulator.
    Run {
        #[command(flatten)]
        compile: CompileArgs,
        /// Link a memory cell, e.g. `cell1=64`.
        #[arg(long, value_parser = parse_memory)]
        memory: Vec<(String, usize)>,
        /// Link a message block.
        #[arg(long)]
        message: Vec<String>,
        #[arg(long, default_value_t = Config::default().step_limit)]
        step_limit: usize,
    },
}

fn parse_memory(arg: &str) -> Result<(String, usize), String> {
    let (name, size) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=SIZE, found {:?}", arg))?;
    let size = size.parse().map_err(|e| format!("bad size {:?}: {}", size, e))?;
    Ok((name.to_owned(), size))
}

fn build(compile: CompileArgs, output: Option<PathBuf>) -> anyhow::Result<()> {
    let program = compile.build()?;
    match output {
        Some(path) => std::fs::write(&path, program)
            .with_context(|| format!("writing {}", path.display()))?,
        None => print!("{}", program),
    }
    Ok(())
}

fn run(
    compile: CompileArgs,
    memory: Vec<(String, usize)>,
    message: Vec<String>,
    step_limit: usize,
) -> anyhow::Result<()> {
    let program = compile.build()?;
    let mut config = Config {
        step_limit,
        ..Config::default()
    };
    for (name, size) in memory {
        config = config.memory(name, size);
    }
    for name in message {
        config = config.message(name);
    }

    let outcome = match emulator::run(&program, &config) {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("    {}", program.lines().nth(e.line).unwrap_or_default());
            exit(1);
        }
    };

    if !outcome.printed.is_empty() {
        println!("{}", outcome.printed);
    }
    for (name, device) in &outcome.devices {
        match device {
            Device::Message(text) => println!("{}: {:?}", name, text),
            Device::Memory(cells) => println!("{}: {:?}", name, cells),
        }
    }
    for (name, value) in outcome.user_variables() {
        println!("{} = {}", name, value);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Commands::Build { compile, output } => build(compile, output),
        Commands::Run {
            compile,
            memory,
            message,
            step_limit,
        } => run(compile, memory, message, step_limit),
    }
}
