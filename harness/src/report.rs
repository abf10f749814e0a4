// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Outcome reporting shared by every testbench.

use std::{
    any::Any,
    fs,
    panic::{self, AssertUnwindSafe},
};

use camino::Utf8Path;
use dashmap::DashMap;
use snafu::{ResultExt, Whatever};

use crate::{ChipModel, TestFailure};

#[derive(PartialEq, Eq, Clone, Debug)]
pub enum Outcome {
    Passed,
    Failed { message: String },
    Panicked { message: String },
}

impl Outcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, Outcome::Passed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Passed => "passed",
            Outcome::Failed { .. } => "failed",
            Outcome::Panicked { .. } => "panicked",
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Outcome::Passed => None,
            Outcome::Failed { message } | Outcome::Panicked { message } => {
                Some(message)
            }
        }
    }
}

#[derive(PartialEq, Eq, Clone, Debug)]
pub struct TestRecord {
    pub name: String,
    pub outcome: Outcome,
    /// Simulated cycles the test ran for.
    pub cycles: u64,
}

/// Collects one [`TestRecord`] per test name. Safe to share between threads
/// running different tests.
#[derive(Default)]
pub struct Report {
    records: DashMap<String, TestRecord>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rerunning a test replaces its previous record.
    pub fn record(&self, record: TestRecord) {
        self.records.insert(record.name.clone(), record);
    }

    pub fn get(&self, name: &str) -> Option<TestRecord> {
        self.records.get(name).map(|record| record.value().clone())
    }

    /// All records, sorted by test name.
    pub fn records(&self) -> Vec<TestRecord> {
        let mut records = self
            .records
            .iter()
            .map(|record| record.value().clone())
            .collect::<Vec<_>>();
        records.sort_by(|lhs, rhs| lhs.name.cmp(&rhs.name));
        records
    }

    pub fn passed(&self) -> usize {
        self.records
            .iter()
            .filter(|record| record.outcome.is_passed())
            .count()
    }

    pub fn failed(&self) -> usize {
        self.records
            .iter()
            .filter(|record| !record.outcome.is_passed())
            .count()
    }

    pub fn to_toml(&self) -> toml::Value {
        let tests = self
            .records()
            .into_iter()
            .map(|record| {
                let mut table = toml::Table::new();
                table.insert("name".into(), record.name.into());
                table.insert("outcome".into(), record.outcome.label().into());
                if let Some(message) = record.outcome.message() {
                    table.insert("message".into(), message.into());
                }
                table.insert(
                    "cycles".into(),
                    i64::try_from(record.cycles).unwrap_or(i64::MAX).into(),
                );
                toml::Value::Table(table)
            })
            .collect::<Vec<_>>();

        let mut summary = toml::Table::new();
        summary.insert("passed".into(), (self.passed() as i64).into());
        summary.insert("failed".into(), (self.failed() as i64).into());

        let mut document = toml::Table::new();
        document.insert("summary".into(), toml::Value::Table(summary));
        document.insert("test".into(), toml::Value::Array(tests));
        toml::Value::Table(document)
    }

    pub fn write_toml(&self, path: &Utf8Path) -> Result<(), Whatever> {
        let contents = toml::to_string_pretty(&self.to_toml())
            .whatever_context("Failed to format report as TOML")?;
        if let Some(parent) = path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
        {
            fs::create_dir_all(parent).whatever_context(format!(
                "Failed to create report directory {parent}"
            ))?;
        }
        fs::write(path, contents)
            .whatever_context(format!("Failed to write report to {path}"))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "<non-string panic payload>".into()
    }
}

/// Runs the test `name` against `model` and records how it went in `report`.
///
/// Failures are recorded and returned. Panics are recorded and then resumed,
/// so the surrounding test harness still sees them.
pub fn report_test<F>(
    report: &Report,
    name: &str,
    model: &mut dyn ChipModel,
    body: F,
) -> Result<(), TestFailure>
where
    F: FnOnce(&mut dyn ChipModel) -> Result<(), TestFailure>,
{
    let start = model.cycle();
    let result = panic::catch_unwind(AssertUnwindSafe(|| body(&mut *model)));
    let cycles = model.cycle().saturating_sub(start);

    let (outcome, result) = match result {
        Ok(Ok(())) => {
            log::info!(target: name, "[REPORT] {} passed in {} cycles", name, cycles);
            (Outcome::Passed, Ok(()))
        }
        Ok(Err(failure)) => {
            log::error!(target: name, "[REPORT] {} failed: {}", name, failure);
            (
                Outcome::Failed {
                    message: failure.to_string(),
                },
                Err(failure),
            )
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            log::error!(target: name, "[REPORT] {} panicked: {}", name, message);
            report.record(TestRecord {
                name: name.to_string(),
                outcome: Outcome::Panicked { message },
                cycles,
            });
            panic::resume_unwind(payload);
        }
    };

    report.record(TestRecord {
        name: name.to_string(),
        outcome,
        cycles,
    });
    result
}
