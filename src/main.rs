use std::{path::PathBuf, process::ExitCode};

use clap::{CommandFactory, Parser as ClapParser, error::ErrorKind};
use colored::Colorize;
use log::{Level, LevelFilter, Log, Metadata, Record, error, info};
use strum::{Display, EnumString};
use wgslc::{
    CompileError, CompileOptions, OptLevel, Reflection, SourceFile, SourceFileOrigin, Target, analyze,
    frontend::ast::printer::print_module,
    legalize, lower,
    middle::{ir::pretty_print::pretty_print_module, program::BindingPoint},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
enum Emit {
    /// Code for the target backend
    #[default]
    Code,
    /// The optimized IR
    Ir,
    /// The parsed module, printed back as WGSL
    Ast,
    /// The resources and workgroup size of every entry point
    Reflection,
}

#[derive(Debug, ClapParser)]
#[command(version, about, long_about = None)]
pub struct Args {
    source_files: Vec<PathBuf>,

    /// Backend to generate code for: vulkan, d3d12, metal or opengl
    #[arg(short, long, default_value_t = Target::Vulkan)]
    target: Target,

    /// Compile only this entry point
    #[arg(short, long)]
    entry_point: Option<String>,

    /// Sets a pipeline constant, as `name=value` or `id=value`
    #[arg(short = 'D', long = "constant", value_parser = parse_constant)]
    constants: Vec<(String, f64)>,

    /// Stop reporting errors after this many
    #[arg(long, default_value_t = wgslc::diagnostics::DEFAULT_MAX_ERRORS)]
    max_errors: usize,

    /// What to print: code, ir, ast or reflection
    #[arg(long, default_value_t = Emit::Code)]
    emit: Emit,

    /// Fold constants and remove dead code
    #[arg(short = 'O')]
    optimize: bool,

    /// Binding of the buffer sizes uniform on backends without a native
    /// `arrayLength`, as `group,binding`
    #[arg(long, value_parser = parse_binding)]
    array_length_binding: Option<BindingPoint>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_constant(argument: &str) -> Result<(String, f64), String> {
    let (name, value) = argument
        .split_once('=')
        .ok_or_else(|| format!("expected 'name=value', found '{argument}'"))?;

    let value = value
        .trim()
        .parse::<f64>()
        .map_err(|error| format!("invalid value for '{name}': {error}"))?;

    Ok((name.trim().to_string(), value))
}

fn parse_binding(argument: &str) -> Result<BindingPoint, String> {
    let parse = |part: &str| {
        part.trim()
            .parse::<u32>()
            .map_err(|error| format!("invalid binding '{argument}': {error}"))
    };

    match argument.split_once(',') {
        Some((group, binding)) => Ok(BindingPoint::new(parse(group)?, parse(binding)?)),
        None => Err(format!("expected 'group,binding', found '{argument}'")),
    }
}

struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let level = match record.level() {
            Level::Error => "error".red().bold(),
            Level::Warn => "warn".yellow().bold(),
            Level::Info => "info".green().bold(),
            Level::Debug => "debug".blue().bold(),
            Level::Trace => "trace".dimmed(),
        };

        eprintln!("{level} {} {}", record.target().dimmed(), record.args());
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn init_logger(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logger(args.verbose);

    if args.source_files.is_empty() {
        Args::command()
            .error(ErrorKind::MissingRequiredArgument, "Missing source files!")
            .exit();
    }

    for source_file in &args.source_files {
        if !source_file.exists() {
            Args::command()
                .error(
                    ErrorKind::InvalidValue,
                    format!("Source file '{}' does not exist!", source_file.display()),
                )
                .exit()
        }

        if !source_file.is_file() {
            Args::command()
                .error(
                    ErrorKind::InvalidValue,
                    format!("Input path '{}' is not a file!", source_file.display()),
                )
                .exit()
        }
    }

    let options = CompileOptions {
        target: args.target,
        entry_point: args.entry_point.clone(),
        overrides: args.constants.clone(),
        max_errors: args.max_errors,
        opt_level: if args.optimize { OptLevel::Basic } else { OptLevel::None },
        array_length_binding: args.array_length_binding,
    };

    let mut failed = false;

    for path in &args.source_files {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) => {
                error!("failed to read '{}': {err}", path.display());
                failed = true;
                continue;
            }
        };

        let source = SourceFile::new(contents, SourceFileOrigin::File(path.clone()));
        info!("compiling {} for {}", path.display(), options.target);

        match emit(&source, &options, args.emit) {
            Ok(output) => print!("{output}"),
            Err(err) => {
                eprintln!("{}", err.render(&source));
                failed = true;
            }
        }
    }

    if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

fn emit(source: &SourceFile, options: &CompileOptions, emit: Emit) -> Result<String, CompileError> {
    match emit {
        Emit::Code => wgslc::compile(source, options).map(|shader| shader.code),
        Emit::Ast => analyze(source, options).map(|program| print_module(&program.module)),
        Emit::Ir => {
            let program = analyze(source, options)?;
            let program = legalize(source, &program, options)?;
            let module = lower(source, &program, options)?;

            Ok(pretty_print_module(&module))
        }
        Emit::Reflection => {
            let program = analyze(source, options)?;
            let program = legalize(source, &program, options)?;

            Ok(Reflection::of(&program, options.target).to_string())
        }
    }
}
