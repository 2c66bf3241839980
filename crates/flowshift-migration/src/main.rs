use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, Command};
use flowshift_migration::config::MigrationConfig;
use flowshift_migration::test_harness::{run_simulator, SimulatorConfig};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn cli() -> Command {
    Command::new("flowshift")
        .version(flowshift_migration::VERSION)
        .about("Live process-instance migration core")
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Log migration steps to stderr"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("simulate")
                .about("Migrate random process instances and check invariants")
                .arg(
                    Arg::new("runs")
                        .long("runs")
                        .default_value("200")
                        .value_parser(value_parser!(u64))
                        .help("Number of process instances to migrate"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("failure-rate")
                        .long("failure-rate")
                        .default_value("0.2")
                        .value_parser(value_parser!(f64))
                        .help("Share of runs with an injected collaborator failure"),
                )
                .arg(
                    Arg::new("stop-on-violation")
                        .long("stop-on-violation")
                        .action(ArgAction::SetTrue)
                        .help("Stop on first violation"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Load a migration configuration and print the effective values")
                .arg(
                    Arg::new("path")
                        .long("path")
                        .help("TOML file (defaults are printed when omitted)"),
                ),
        )
}

fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("verbose"));

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let defaults = SimulatorConfig::default();
            let failure_rate = args
                .get_one::<f64>("failure-rate")
                .copied()
                .unwrap_or(defaults.failure_rate);
            anyhow::ensure!(
                (0.0..=1.0).contains(&failure_rate),
                "--failure-rate must be between 0 and 1"
            );
            let config = SimulatorConfig {
                seed: args.get_one::<u64>("seed").copied().unwrap_or(defaults.seed),
                runs: args.get_one::<u64>("runs").copied().unwrap_or(defaults.runs),
                failure_rate,
                stop_on_first_violation: args.get_flag("stop-on-violation"),
                ..defaults
            };

            let report = run_simulator(config);
            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.generate_text());
            }
            std::process::exit(if report.passed() { 0 } else { 1 });
        }
        Some(("config", args)) => {
            let config = match args.get_one::<String>("path") {
                Some(path) => MigrationConfig::from_file(path)
                    .with_context(|| format!("loading {path}"))?,
                None => MigrationConfig::default(),
            };
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        _ => Ok(()),
    }
}
