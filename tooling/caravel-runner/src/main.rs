// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

use std::{env::current_dir, sync::Arc, sync::mpsc};

use argh::FromArgs;
use camino::{Utf8Path, Utf8PathBuf};
use caravel_harness::{report::Report, scenario::run_scenario};
use config::{BenchConfig, discover_stimulus};
use indicatif::ProgressBar;
use owo_colors::OwoColorize;
use snafu::{ResultExt, Whatever, whatever};
use threadpool::ThreadPool;

mod config;

/// Run Caravel firmware testbenches against recorded stimulus
#[derive(FromArgs)]
struct CaravelRunnerCommand {
    /// log test sequences at info level
    #[argh(switch, short = 'v')]
    verbose: bool,

    #[argh(subcommand)]
    subcommand: Subcommand,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Subcommand {
    Run(RunSubcommand),
    List(ListSubcommand),
    Check(CheckSubcommand),
}

/// run testbenches
#[derive(FromArgs)]
#[argh(subcommand, name = "run")]
struct RunSubcommand {
    /// substring of testbench names to run
    #[argh(positional, default = "String::new()")]
    test_pattern: String,

    /// directory of stimulus files, overriding caravel.toml
    #[argh(option, short = 's')]
    stimulus_directory: Option<Utf8PathBuf>,

    /// where to write the TOML report, overriding caravel.toml
    #[argh(option, short = 'r')]
    report: Option<Utf8PathBuf>,

    /// how many testbenches to run at once, overriding caravel.toml
    #[argh(option, short = 'j')]
    jobs: Option<usize>,
}

/// list the registered testbenches
#[derive(FromArgs)]
#[argh(subcommand, name = "list")]
struct ListSubcommand {}

/// check that every testbench has well-formed stimulus
#[derive(FromArgs)]
#[argh(subcommand, name = "check")]
struct CheckSubcommand {
    /// directory of stimulus files, overriding caravel.toml
    #[argh(option, short = 's')]
    stimulus_directory: Option<Utf8PathBuf>,
}

/// Runs every testbench matching the pattern and returns how many failed.
fn run(
    config: BenchConfig,
    options: RunSubcommand,
) -> Result<usize, Whatever> {
    let stimulus_directory = options
        .stimulus_directory
        .unwrap_or(config.stimulus_directory);
    let report_path = options.report.unwrap_or(config.report);
    let worker_count = options.jobs.unwrap_or(config.jobs).max(1);

    let mut stimuli = discover_stimulus(&stimulus_directory)?;
    for scenario in stimuli.keys() {
        if caravel_scenarios::find(scenario).is_none() {
            log::warn!("Ignoring stimulus for unknown testbench {}", scenario);
        }
    }

    let scenarios = caravel_scenarios::all()
        .into_iter()
        .filter(|scenario| scenario.name().contains(&options.test_pattern))
        .collect::<Vec<_>>();

    let pool = ThreadPool::new(worker_count);
    let report = Arc::new(Report::new());

    let test_count = scenarios.len();
    println!(
        "{} {} test{} [{}/{}.toml] across {} thread{}",
        "     STARTING".bold().bright_cyan(),
        test_count,
        if test_count == 1 { "" } else { "s" },
        stimulus_directory,
        if options.test_pattern.is_empty() {
            "*".to_string()
        } else {
            format!("*{}*", options.test_pattern)
        },
        worker_count,
        if worker_count == 1 { "" } else { "s" },
    );

    let progress = ProgressBar::new(test_count as u64);
    let (tx, rx) = mpsc::channel();

    let mut failures = 0;
    for scenario in scenarios {
        let Some((_, stimulus)) = stimuli.remove(scenario.name()) else {
            failures += 1;
            progress.println(format!(
                "        {} [{}]\nNo stimulus recorded in {}",
                "FAIL".bold().bright_red(),
                scenario.name(),
                stimulus_directory
            ));
            progress.inc(1);
            continue;
        };

        let tx = tx.clone();
        let report = Arc::clone(&report);
        pool.execute(move || {
            let mut chip = stimulus.into_chip();
            let result = run_scenario(scenario, &mut chip, &report)
                .map_err(|failure| failure.to_string());
            let _ = tx.send((scenario.name(), result));
        });
    }
    drop(tx);

    while let Ok((test_name, result)) = rx.recv() {
        match result {
            Ok(()) => progress.println(format!(
                "         {} [{}] {} cycles",
                "PASS".bold().bright_green(),
                test_name,
                report
                    .get(test_name)
                    .map(|record| record.cycles)
                    .unwrap_or_default()
            )),
            Err(failure) => {
                failures += 1;
                progress.println(format!(
                    "        {} [{}]\n{}",
                    "FAIL".bold().bright_red(),
                    test_name,
                    failure
                ));
            }
        }
        progress.inc(1);
    }

    // a worker that panicked never reports back
    let missing = test_count as u64 - progress.position();
    if missing > 0 {
        failures += missing as usize;
        progress.println(format!(
            "      {} {} test{} panicked",
            "CLOSED".bold().on_bright_yellow(),
            missing,
            if missing == 1 { "" } else { "s" },
        ));
    }
    progress.finish_and_clear();

    report.write_toml(&report_path)?;

    println!(
        "{} with {} failure{} (report at {})",
        "     FINISHED".bold().bright_cyan(),
        failures,
        if failures == 1 { "" } else { "s" },
        report_path
    );

    Ok(failures)
}

fn list(config: &BenchConfig) {
    let stimuli = discover_stimulus(&config.stimulus_directory).ok();
    for scenario in caravel_scenarios::all() {
        let stimulus = stimuli
            .as_ref()
            .and_then(|stimuli| stimuli.get(scenario.name()))
            .map(|(path, _)| path.to_string())
            .unwrap_or_else(|| "no stimulus".into());
        println!(
            "  {} ({} cycles) [{}]",
            scenario.name().bold(),
            scenario.timeout_cycles(),
            stimulus
        );
    }
}

fn check(stimulus_directory: &Utf8Path) -> Result<(), Whatever> {
    let stimuli = discover_stimulus(stimulus_directory)?;

    for (scenario, (path, _)) in &stimuli {
        if caravel_scenarios::find(scenario).is_none() {
            whatever!("{} drives unknown testbench {}", path, scenario);
        }
    }
    for scenario in caravel_scenarios::all() {
        if !stimuli.contains_key(scenario.name()) {
            whatever!(
                "Testbench {} has no stimulus in {}",
                scenario.name(),
                stimulus_directory
            );
        }
    }

    println!("Everything looks good!");
    Ok(())
}

#[snafu::report]
fn main() -> Result<(), Whatever> {
    let command: CaravelRunnerCommand = argh::from_env();

    let mut logger = colog::default_builder();
    logger.filter_level(if command.verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    });
    logger.parse_default_env();
    logger
        .try_init()
        .whatever_context("Failed to initialize logging")?;

    let current_directory = Utf8PathBuf::from_path_buf(
        current_dir()
            .whatever_context("Failed to determine current directory")?,
    )
    .map_err(|_| "?")
    .whatever_context("Failed to parse current directory as UTF-8")?;

    let config = BenchConfig::load(&current_directory)?;

    match command.subcommand {
        Subcommand::Run(run_subcommand) => {
            if run(config, run_subcommand)? > 0 {
                whatever!("Exiting due to failure(s)");
            }
            Ok(())
        }
        Subcommand::List(_list_subcommand) => {
            list(&config);
            Ok(())
        }
        Subcommand::Check(check_subcommand) => check(
            &check_subcommand
                .stimulus_directory
                .unwrap_or(config.stimulus_directory),
        ),
    }
}
