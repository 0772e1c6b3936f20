use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command, ValueHint};
use log::LevelFilter;
use std::path::PathBuf;

use icd_cli::commands::build::run_build;
use icd_cli::commands::code_vecs::run_code_vecs;
use icd_cli::commands::params::run_params;
use icd_cli::input::RunConfig;
use icd_models::models::factory::MODEL_ARCHS;

fn config_arg() -> Arg {
    Arg::new("config")
        .help("Path to the JSON run configuration")
        .required(true)
        .value_parser(clap::value_parser!(PathBuf))
        .value_hint(ValueHint::FilePath)
}

fn lookup_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("vocab")
            .long("vocab")
            .help("Vocabulary file, one word per line. Overrides `vocab` in the config.")
            .value_parser(clap::value_parser!(PathBuf))
            .value_hint(ValueHint::FilePath),
    )
    .arg(
        Arg::new("codes")
            .long("codes")
            .help("Label code file. Overrides `codes` in the config.")
            .value_parser(clap::value_parser!(PathBuf))
            .value_hint(ValueHint::FilePath),
    )
    .arg(
        Arg::new("descriptions")
            .long("descriptions")
            .help("Description vectors file (`code idx idx ...`). Overrides `descriptions` in the config.")
            .value_parser(clap::value_parser!(PathBuf))
            .value_hint(ValueHint::FilePath),
    )
}

fn main() -> Result<()> {
    env_logger::Builder::default()
        .filter_level(LevelFilter::Error)
        .parse_env(env_logger::Env::default().filter_or("ICD_LOG", "error,icd=info,icd_models=info"))
        .init();

    let matches = Command::new("icd")
        .version(clap::crate_version!())
        .author("Justin Sing <justincsing@gmail.com>")
        .about("ICD code classifier model factory")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            lookup_args(
                Command::new("build")
                    .about("Build a model from a configuration and print its summary")
                    .arg(config_arg())
                    .arg(
                        Arg::new("model")
                            .short('m')
                            .long("model")
                            .help("Model architecture. Overrides `model` in the config.")
                            .value_parser(MODEL_ARCHS.to_vec()),
                    )
                    .arg(
                        Arg::new("gpu")
                            .long("gpu")
                            .help("Accelerator ordinal, negative for CPU. Overrides `gpu` in the config.")
                            .value_parser(clap::value_parser!(i32))
                            .allow_negative_numbers(true),
                    )
                    .arg(
                        Arg::new("device")
                            .short('d')
                            .long("device")
                            .help("Device string: cpu, cuda or cuda:N. Takes precedence over --gpu.")
                            .value_parser(clap::builder::NonEmptyStringValueParser::new()),
                    )
                    .arg(
                        Arg::new("test_model")
                            .short('t')
                            .long("test-model")
                            .help("Safetensors weights to load into the built model")
                            .value_parser(clap::value_parser!(PathBuf))
                            .value_hint(ValueHint::FilePath),
                    )
                    .arg(
                        Arg::new("save")
                            .short('o')
                            .long("save")
                            .help("Write the model weights (safetensors) to this path")
                            .value_parser(clap::value_parser!(PathBuf))
                            .value_hint(ValueHint::FilePath),
                    )
                    .arg(
                        Arg::new("tasks")
                            .long("tasks")
                            .help("Comma separated task names; builds the sp-mtl multi-task model")
                            .value_delimiter(',')
                            .action(ArgAction::Append),
                    ),
            ),
        )
        .subcommand(
            Command::new("params")
                .about("Print the run parameters recorded for bookkeeping")
                .arg(config_arg())
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .help("Run directory to write params.json into")
                        .value_parser(clap::value_parser!(PathBuf))
                        .value_hint(ValueHint::DirPath),
                ),
        )
        .subcommand(
            lookup_args(
                Command::new("code-vecs")
                    .about("Print padded description vectors for label indices")
                    .arg(config_arg())
                    .arg(
                        Arg::new("indices")
                            .help("Label indices")
                            .required(true)
                            .num_args(1..)
                            .value_parser(clap::value_parser!(usize)),
                    ),
            ),
        )
        .subcommand(Command::new("models").about("List supported model architectures"))
        .help_template(
            "{usage-heading} {usage}\n\n\
             {about-with-newline}\n\
             Written by {author-with-newline}Version {version}\n\n\
             {all-args}{after-help}",
        )
        .get_matches();

    match matches.subcommand() {
        Some(("build", sub_m)) => handle_build(sub_m),
        Some(("params", sub_m)) => handle_params(sub_m),
        Some(("code-vecs", sub_m)) => handle_code_vecs(sub_m),
        Some(("models", _)) => {
            for name in MODEL_ARCHS {
                println!("{}", name);
            }
            Ok(())
        }
        _ => unreachable!("Subcommand is required by CLI configuration"),
    }
}

fn handle_build(matches: &ArgMatches) -> Result<()> {
    let config_path: &PathBuf = matches.get_one("config").unwrap();
    log::info!("[ICD::Build] Building model from config: {:?}", config_path);

    let config = RunConfig::from_arguments(config_path, matches)?;
    let save: Option<&PathBuf> = matches.get_one("save");
    let tasks: Option<Vec<String>> = matches
        .get_many::<String>("tasks")
        .map(|values| values.cloned().collect());

    match run_build(&config, save.map(PathBuf::as_path), tasks.as_deref()) {
        Ok(_) => Ok(()),
        Err(e) => {
            log::error!("Model build failed: {:#}", e);
            std::process::exit(1)
        }
    }
}

fn handle_params(matches: &ArgMatches) -> Result<()> {
    let config_path: &PathBuf = matches.get_one("config").unwrap();
    let config = RunConfig::from_arguments(config_path, matches)?;
    let output: Option<&PathBuf> = matches.get_one("output");

    match run_params(&config, output.map(PathBuf::as_path)) {
        Ok(json) => {
            println!("{}", json);
            Ok(())
        }
        Err(e) => {
            log::error!("Writing parameters failed: {:#}", e);
            std::process::exit(1)
        }
    }
}

fn handle_code_vecs(matches: &ArgMatches) -> Result<()> {
    let config_path: &PathBuf = matches.get_one("config").unwrap();
    let config = RunConfig::from_arguments(config_path, matches)?;
    let indices: Vec<usize> = matches
        .get_many::<usize>("indices")
        .map(|values| values.copied().collect())
        .unwrap_or_default();

    match run_code_vecs(&config, &indices) {
        Ok(json) => {
            println!("{}", json);
            Ok(())
        }
        Err(e) => {
            log::error!("Building code vectors failed: {:#}", e);
            std::process::exit(1)
        }
    }
}
