//! Binary entry point: parse the CLI, build the run configuration, grade.
//!
//! Exit status is 0 on any completed run (a grade was produced, or the
//! submission failed its syntax check) and non-zero on an infrastructure
//! failure before a grade could be produced.

use clap::Parser;
use std::process::ExitCode;

use vmgrade::config::{Cli, GraderConfig, OutputFormat};
use vmgrade::hypervisor::VirshClient;
use vmgrade::orchestrator::Orchestrator;
use vmgrade::reporter::{HumanReporter, JsonReporter, Reporter};
use vmgrade::shell::OpenSshConnector;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match GraderConfig::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[vmgrade] {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut reporter: Box<dyn Reporter> = match cli.format {
        OutputFormat::Human => Box::new(HumanReporter),
        OutputFormat::Json => Box::new(JsonReporter),
    };

    let hypervisor = VirshClient::new(config.hypervisor_uri.clone());
    let connector = OpenSshConnector {
        config: config.shell.clone(),
    };

    let orchestrator = Orchestrator::new(&config, &hypervisor, &connector);
    match orchestrator.run(reporter.as_mut()) {
        Ok(_) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}
