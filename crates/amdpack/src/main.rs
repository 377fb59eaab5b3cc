use std::{
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
};

use amdpack::{
    bundler::{Bundler, CombinePolicy, CompileOutcome},
    config::Config,
    module_config::CombineSetting,
    module_resolver::ModuleResolver,
    pipeline::Pipeline,
};
use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use log::{LevelFilter, error};

/// Static-asset build pipeline with a dependency-aware AMD module bundler
#[derive(Parser, Debug)]
#[command(name = "amdpack", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the project into the output directory
    Build {
        #[command(flatten)]
        project: ProjectArgs,

        /// Output directory (defaults to `output` in the project)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Compile one module and print the result
    Compile {
        /// Module id, e.g. `er/View`
        module_id: String,

        #[command(flatten)]
        project: ProjectArgs,

        /// Inline the module's dependencies
        #[arg(long)]
        combine: bool,
    },
}

#[derive(Args, Debug)]
struct ProjectArgs {
    /// Project root
    #[arg(short, long, default_value = ".")]
    base_dir: PathBuf,

    /// Configuration file (defaults to `amdpack.toml` in the project)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Module configuration, relative to the project root
    #[arg(long)]
    module_config: Option<String>,
}

impl ProjectArgs {
    fn load_config(&self) -> Result<Config> {
        let mut config = Config::load(&self.base_dir, self.config.as_deref())?;
        if let Some(module_config) = &self.module_config {
            config.module_config.clone_from(module_config);
        }
        Ok(config)
    }
}

fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .parse_default_env()
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Build { project, output } => {
            let mut config = project.load_config()?;
            if let Some(output) = output {
                config.output_dir = output;
            }
            let summary = Pipeline::new(config).build(&project.base_dir)?;
            writeln!(
                io::stdout().lock(),
                "Built {} files into {}",
                summary.text_files + summary.binary_files,
                summary.output_dir.display()
            )?;
            Ok(())
        }
        Command::Compile {
            module_id,
            project,
            combine,
        } => {
            let config = project.load_config()?;
            let ctx = Pipeline::new(config.clone()).load(&project.base_dir)?;
            let resolver = ModuleResolver::from_config_file(&project.base_dir, &config.module_config)?;

            let path = resolver.resolve_file(&module_id);
            let file = ctx
                .registry()
                .get(&path)
                .with_context(|| format!("Module '{module_id}' resolves to {path}, which does not exist"))?;

            let configured = resolver.config().combine_setting(&module_id);
            let policy = match (combine, configured) {
                (true, Some(setting @ CombineSetting::Rules { .. })) => CombinePolicy::from(setting),
                (true, _) => CombinePolicy::All,
                (false, setting) => setting.map(CombinePolicy::from).unwrap_or_default(),
            };

            let outcome = Bundler::new(ctx.registry(), &resolver)
                .with_wrapper(config.module_compiler.wrapper.as_str())
                .compile(&module_id, file.raw_data(), policy);
            let CompileOutcome::Compiled(code) = outcome else {
                bail!("{path} does not define a module");
            };
            writeln!(io::stdout().lock(), "{code}")?;
            Ok(())
        }
    }
}
