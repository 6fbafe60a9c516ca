use std::process::ExitCode;

use clap::{CommandFactory, Parser};

use epigimp::cli::{self, CliArgs};
use epigimp::logger;
use epigimp::settings::EditorSettings;

fn main() -> ExitCode {
    let args = CliArgs::parse();

    // The interactive editor lives outside this crate; without inputs there
    // is nothing to do headless.
    if !args.has_inputs() {
        let _ = CliArgs::command().print_help();
        return ExitCode::SUCCESS;
    }

    let settings = EditorSettings::load();
    logger::init(settings.log_level.into(), args.verbose);
    log::info!("EpiGimp {} batch run", env!("CARGO_PKG_VERSION"));

    cli::run(args, &settings)
}
