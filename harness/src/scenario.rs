// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! See the [`#[scenario]`](caravel_harness_macro::scenario) macro for
//! details.

use crate::{
    CaravelEnv, ChipModel, TestFailure, configure,
    report::{Report, report_test},
};

/// A `&'static dyn Scenario` represents a registered testbench. You should not
/// implement this `trait` manually. Instead, use the `#[scenario]` macro to
/// derive it for you.
pub trait Scenario: Sync {
    /// The name of the testbench function, used as its test name.
    fn name(&self) -> &'static str;

    /// The cycle budget passed to [`configure`].
    fn timeout_cycles(&self) -> u64;

    /// The test sequence itself.
    fn run(&self, env: &mut CaravelEnv<'_>) -> Result<(), TestFailure>;
}

/// Configures an environment around `model` with the scenario's budget, runs
/// the scenario, and records the outcome in `report`.
pub fn run_scenario(
    scenario: &dyn Scenario,
    model: &mut dyn ChipModel,
    report: &Report,
) -> Result<(), TestFailure> {
    report_test(report, scenario.name(), model, |model| {
        let mut env =
            configure(model, scenario.name(), scenario.timeout_cycles());
        scenario.run(&mut env)
    })
}
