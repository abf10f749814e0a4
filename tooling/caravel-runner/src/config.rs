// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

use std::{collections::BTreeMap, fs, thread::available_parallelism};

use camino::{Utf8Path, Utf8PathBuf};
use caravel_harness::scripted::Stimulus;
use snafu::{OptionExt, ResultExt, Whatever, whatever};

pub const CONFIG_FILE_NAME: &str = "caravel.toml";
pub const DEFAULT_STIMULUS_DIRECTORY: &str = "scenarios/stimulus";
pub const DEFAULT_REPORT_PATH: &str = "caravel-report.toml";

/// Settings from the `[bench]` section of `caravel.toml`. Relative paths are
/// resolved against the directory containing the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchConfig {
    pub stimulus_directory: Utf8PathBuf,
    pub report: Utf8PathBuf,
    pub jobs: usize,
}

impl BenchConfig {
    fn defaults(root: &Utf8Path) -> Self {
        Self {
            stimulus_directory: root.join(DEFAULT_STIMULUS_DIRECTORY),
            report: root.join(DEFAULT_REPORT_PATH),
            jobs: available_parallelism()
                .map(|value| value.get())
                .unwrap_or(1),
        }
    }

    /// Reads `caravel.toml` from `root` if there is one.
    pub fn load(root: &Utf8Path) -> Result<Self, Whatever> {
        let config_path = root.join(CONFIG_FILE_NAME);
        if !config_path.is_file() {
            return Ok(Self::defaults(root));
        }

        let contents = fs::read_to_string(&config_path).whatever_context(
            format!("Failed to read {config_path}"),
        )?;
        Self::parse(root, &contents)
            .whatever_context(format!("Failed to load {config_path}"))
    }

    pub fn parse(root: &Utf8Path, contents: &str) -> Result<Self, Whatever> {
        let mut config = Self::defaults(root);

        let caravel_toml: toml::Value = toml::from_str(contents)
            .whatever_context("Failed to parse as a valid TOML file")?;
        let Some(bench) = caravel_toml.get("bench") else {
            return Ok(config);
        };

        if let Some(stimulus_directory) = bench.get("stimulus_directory") {
            config.stimulus_directory = root.join(
                stimulus_directory.as_str().whatever_context(
                    "`bench.stimulus_directory` must be a string",
                )?,
            );
        }
        if let Some(report) = bench.get("report") {
            config.report = root.join(
                report
                    .as_str()
                    .whatever_context("`bench.report` must be a string")?,
            );
        }
        if let Some(jobs) = bench.get("jobs") {
            config.jobs = jobs
                .as_integer()
                .and_then(|jobs| usize::try_from(jobs).ok())
                .filter(|jobs| *jobs > 0)
                .whatever_context("`bench.jobs` must be a positive integer")?;
        }

        Ok(config)
    }
}

/// Loads every `*.toml` file in `directory`, keyed by the scenario each was
/// recorded for.
pub fn discover_stimulus(
    directory: &Utf8Path,
) -> Result<BTreeMap<String, (Utf8PathBuf, Stimulus)>, Whatever> {
    if !directory.is_dir() {
        whatever!(
            "Stimulus directory {} either does not exist or is not a directory",
            directory
        );
    }

    let mut stimuli = BTreeMap::new();
    let pattern = directory.join("*.toml");
    for path in glob::glob(pattern.as_str())
        .whatever_context(format!("Invalid stimulus pattern {pattern}"))?
        .flatten()
    {
        let Ok(path) = Utf8PathBuf::try_from(path) else {
            continue;
        };
        let stimulus = Stimulus::from_toml_file(&path)?;
        let Some(scenario) = stimulus.scenario().map(str::to_string) else {
            whatever!("Stimulus file {} does not name a `scenario`", path);
        };
        if let Some((previous, _)) = stimuli.get(&scenario) {
            whatever!(
                "Stimulus files {} and {} both drive {}",
                previous,
                path,
                scenario
            );
        }
        stimuli.insert(scenario, (path, stimulus));
    }

    Ok(stimuli)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_bench_section_keeps_defaults() {
        let root = Utf8Path::new("/work");
        let config = BenchConfig::parse(root, "").expect("empty file parses");
        assert_eq!(config, BenchConfig::defaults(root));
    }

    #[test]
    fn paths_are_relative_to_the_config() {
        let config = BenchConfig::parse(
            Utf8Path::new("/work"),
            "[bench]\nstimulus_directory = \"stim\"\nreport = \"out/report.toml\"\njobs = 2\n",
        )
        .expect("valid config");
        assert_eq!(config.stimulus_directory, "/work/stim");
        assert_eq!(config.report, "/work/out/report.toml");
        assert_eq!(config.jobs, 2);
    }

    fn temporary_directory() -> (tempfile::TempDir, Utf8PathBuf) {
        let directory = tempfile::tempdir().expect("temporary directory");
        let path = Utf8PathBuf::try_from(directory.path().to_path_buf())
            .expect("temporary directory is UTF-8");
        (directory, path)
    }

    fn write(directory: &Utf8Path, file_name: &str, contents: &str) {
        fs::write(directory.join(file_name), contents)
            .expect("temporary directory is writable");
    }

    #[test]
    fn stimulus_is_keyed_by_scenario() {
        let (_guard, root) = temporary_directory();
        write(&root, "first.toml", "scenario = \"basic_test\"\n");
        write(
            &root,
            "second.toml",
            "scenario = \"uart0_test\"\n[[step]]\npulses = 3\n",
        );
        write(&root, "notes.txt", "not a stimulus file");

        let stimuli = discover_stimulus(&root).expect("valid directory");
        assert_eq!(
            stimuli.keys().map(String::as_str).collect::<Vec<_>>(),
            ["basic_test", "uart0_test"]
        );
        let (path, stimulus) = &stimuli["uart0_test"];
        assert_eq!(path, &root.join("second.toml"));
        assert_eq!(stimulus.events().len(), 6);
    }

    #[test]
    fn two_files_cannot_drive_one_scenario() {
        let (_guard, root) = temporary_directory();
        write(&root, "a.toml", "scenario = \"basic_test\"\n");
        write(&root, "b.toml", "scenario = \"basic_test\"\n");
        assert!(discover_stimulus(&root).is_err());
    }

    #[test]
    fn stimulus_files_must_name_a_scenario() {
        let (_guard, root) = temporary_directory();
        write(&root, "anonymous.toml", "[[step]]\ndelay = 10\n");
        assert!(discover_stimulus(&root).is_err());
    }

    #[test]
    fn malformed_stimulus_files_are_reported() {
        let (_guard, root) = temporary_directory();
        write(
            &root,
            "overflow.toml",
            &format!(
                "scenario = \"basic_test\"\n{}",
                "[[step]]\ndelay = 9223372036854775807\n".repeat(3)
            ),
        );
        assert!(discover_stimulus(&root).is_err());
    }

    #[test]
    fn stimulus_directory_must_exist() {
        let (_guard, root) = temporary_directory();
        assert!(discover_stimulus(&root.join("missing")).is_err());
        write(&root, "file.toml", "scenario = \"basic_test\"\n");
        assert!(discover_stimulus(&root.join("file.toml")).is_err());
    }

    #[test]
    fn config_files_are_loaded_from_the_root() {
        let (_guard, root) = temporary_directory();
        assert_eq!(
            BenchConfig::load(&root).expect("defaults without a file"),
            BenchConfig::defaults(&root)
        );

        write(&root, CONFIG_FILE_NAME, "[bench]\njobs = 3\n");
        let config = BenchConfig::load(&root).expect("valid config");
        assert_eq!(config.jobs, 3);
        assert_eq!(
            config.stimulus_directory,
            root.join(DEFAULT_STIMULUS_DIRECTORY)
        );

        write(&root, CONFIG_FILE_NAME, "[bench]\nreport = 4\n");
        assert!(BenchConfig::load(&root).is_err());
    }

    #[test]
    fn jobs_must_be_positive() {
        assert!(
            BenchConfig::parse(Utf8Path::new("/work"), "[bench]\njobs = 0\n")
                .is_err()
        );
    }
}
