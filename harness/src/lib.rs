// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! This module implements the environment that Caravel testbenches run
//! against.
//!
//! A testbench never talks to a simulator directly. It receives a
//! [`CaravelEnv`] from [`configure`], which wraps some [`ChipModel`] and
//! enforces the test's cycle budget on every wait. See [`scripted`] for a
//! model that replays recorded firmware activity.

use std::fmt;

use snafu::Snafu;

pub mod pulse;
pub mod report;
pub mod scenario;
pub mod scripted;
pub mod uart;

pub mod prelude {
    pub use crate as caravel_harness;
    pub use crate::{
        CaravelEnv, ChipModel, EnvironmentOptions, Level, Pin, TestFailure,
        configure, configure_with,
        pulse::{PulseCount, tally_pulses, wait_for_pulses},
        report::{Outcome, Report, report_test},
        scenario::{Scenario, run_scenario},
        scripted::{ScriptedChip, Stimulus},
        uart::{ChannelBinding, Uart},
    };
    pub use caravel_harness_macro::scenario;
}

/// The number of user project I/O pads (`mprj_io`) on Caravel.
pub const MPRJ_IO_COUNT: usize = 38;

/// Used when a testbench does not pick its own budget.
pub const DEFAULT_TIMEOUT_CYCLES: u64 = 1_000_000;

/// A digital logic level.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn is_high(self) -> bool {
        matches!(self, Level::High)
    }
}

impl From<bool> for Level {
    fn from(value: bool) -> Self {
        if value { Level::High } else { Level::Low }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Low => "0",
            Level::High => "1",
        }
        .fmt(f)
    }
}

/// Pad index out of range.
#[derive(Debug, Snafu)]
#[snafu(display(
    "Pad {index} does not exist: Caravel has {MPRJ_IO_COUNT} mprj_io pads"
))]
pub struct NoSuchPad {
    index: usize,
}

/// One of the [`MPRJ_IO_COUNT`] user project I/O pads.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug, PartialOrd, Ord)]
pub struct Pin(u8);

impl Pin {
    pub fn new(index: usize) -> Result<Self, NoSuchPad> {
        if index >= MPRJ_IO_COUNT {
            return NoSuchPadSnafu { index }.fail();
        }
        Ok(Self(index as u8))
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mprj_io[{}]", self.0)
    }
}

/// A simulated Caravel chip as seen from the testbench: the management GPIO,
/// the user I/O pads, the housekeeping hold, and a clock to advance.
///
/// Implement this `trait` to drive the testbenches from a real simulator. See
/// [`scripted::ScriptedChip`] for a deterministic replay model.
pub trait ChipModel {
    /// Used in log lines.
    fn name(&self) -> &str;

    /// Frequency of the core clock. UART bit timing is derived from this.
    fn clock_hz(&self) -> u64;

    /// The number of clock cycles simulated so far.
    fn cycle(&self) -> u64;

    /// Advances the simulation by exactly one clock cycle.
    fn step(&mut self);

    /// Releases the housekeeping SPI chip-select hold so the management core
    /// starts executing firmware.
    fn release_csb(&mut self);

    /// The current level of the management GPIO.
    fn mgmt_gpio(&self) -> Level;

    /// The current level driven on `pin`.
    fn pad(&self, pin: Pin) -> Level;
}

/// Optional configuration for [`configure_with`]. Usually, you can just use
/// [`configure`].
#[derive(Clone, Debug)]
pub struct EnvironmentOptions {
    /// Simulated cycles after which any pending wait fails the test.
    pub timeout_cycles: u64,

    /// Whether the harness itself should log through the log crate. Test
    /// sequences log regardless.
    pub log: bool,
}

impl Default for EnvironmentOptions {
    fn default() -> Self {
        Self {
            timeout_cycles: DEFAULT_TIMEOUT_CYCLES,
            log: false,
        }
    }
}

impl EnvironmentOptions {
    /// The same as the [`Default`] implementation except that the log crate is
    /// used.
    pub fn default_logging() -> Self {
        Self {
            log: true,
            ..Default::default()
        }
    }
}

/// The only way a testbench fails.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TestFailure {
    #[snafu(display("{what} expected '{expected}', got '{observed}'"))]
    Mismatch {
        what: String,
        expected: String,
        observed: String,
    },
    #[snafu(display(
        "{milestone}: expected {expected} pulse(s), observed {observed}"
    ))]
    PulseCount {
        milestone: String,
        expected: usize,
        observed: usize,
    },
    #[snafu(display(
        "Test {test} timed out after {elapsed} of {budget} cycles waiting for {waiting_for}"
    ))]
    Timeout {
        test: String,
        waiting_for: String,
        elapsed: u64,
        budget: u64,
    },
    #[snafu(context(false), display("Invalid channel binding: {source}"))]
    Channel { source: uart::ChannelBindingError },
}

/// A configured simulation environment for one test run.
pub struct CaravelEnv<'m> {
    model: &'m mut dyn ChipModel,
    test_name: String,
    options: EnvironmentOptions,
    start_cycle: u64,
}

/// Establishes the environment for the test `test_name` with an upper bound of
/// `timeout_cycles` simulated cycles.
pub fn configure<'m>(
    model: &'m mut dyn ChipModel,
    test_name: &str,
    timeout_cycles: u64,
) -> CaravelEnv<'m> {
    configure_with(
        model,
        test_name,
        EnvironmentOptions {
            timeout_cycles,
            ..Default::default()
        },
    )
}

/// See [`configure`].
pub fn configure_with<'m>(
    model: &'m mut dyn ChipModel,
    test_name: &str,
    options: EnvironmentOptions,
) -> CaravelEnv<'m> {
    if options.log {
        log::info!(
            target: test_name,
            "Configured {} with a budget of {} cycles at {} Hz",
            model.name(),
            options.timeout_cycles,
            model.clock_hz()
        );
    }
    let start_cycle = model.cycle();
    CaravelEnv {
        model,
        test_name: test_name.to_string(),
        options,
        start_cycle,
    }
}

impl CaravelEnv<'_> {
    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    pub fn options(&self) -> &EnvironmentOptions {
        &self.options
    }

    pub fn clock_hz(&self) -> u64 {
        self.model.clock_hz()
    }

    /// Cycles simulated since [`configure`].
    pub fn elapsed_cycles(&self) -> u64 {
        self.model.cycle().saturating_sub(self.start_cycle)
    }

    pub fn model(&self) -> &dyn ChipModel {
        &*self.model
    }

    /// Lets the firmware start executing.
    pub fn release_csb(&mut self) {
        if self.options.log {
            log::info!(
                target: self.test_name.as_str(),
                "Releasing CSB at cycle {}",
                self.model.cycle()
            );
        }
        self.model.release_csb();
    }

    /// Blocks until the management GPIO reads `level`. Returns immediately if
    /// it already does.
    pub fn wait_mgmt_gpio(&mut self, level: Level) -> Result<(), TestFailure> {
        self.wait_until(&format!("management GPIO == {level}"), |model| {
            model.mgmt_gpio() == level
        })
    }

    /// Blocks for exactly `cycles` clock cycles.
    pub fn wait_cycles(
        &mut self,
        cycles: u64,
        waiting_for: &str,
    ) -> Result<(), TestFailure> {
        let target = self.model.cycle() + cycles;
        self.wait_until(waiting_for, |model| model.cycle() >= target)
    }

    /// Steps the model until `condition` holds, failing the test with
    /// [`TestFailure::Timeout`] once the cycle budget is spent.
    pub fn wait_until(
        &mut self,
        waiting_for: &str,
        mut condition: impl FnMut(&dyn ChipModel) -> bool,
    ) -> Result<(), TestFailure> {
        loop {
            if condition(&*self.model) {
                return Ok(());
            }

            let elapsed = self.elapsed_cycles();
            if elapsed >= self.options.timeout_cycles {
                log::error!(
                    target: self.test_name.as_str(),
                    "[TEST] Timeout after {} cycles waiting for {}",
                    elapsed,
                    waiting_for
                );
                return TimeoutSnafu {
                    test: self.test_name.clone(),
                    waiting_for,
                    elapsed,
                    budget: self.options.timeout_cycles,
                }
                .fail();
            }

            self.model.step();
        }
    }

    /// Fails the test unless `observed` contains `expected`. Both outcomes are
    /// logged.
    pub fn expect_substring(
        &self,
        what: &str,
        expected: &str,
        observed: &str,
    ) -> Result<(), TestFailure> {
        if observed.contains(expected) {
            log::info!(
                target: self.test_name.as_str(),
                "[TEST] PASS - {} received expected message: '{}'",
                what,
                observed
            );
            Ok(())
        } else {
            log::error!(
                target: self.test_name.as_str(),
                "[TEST] FAIL - {} expected '{}', got '{}'",
                what,
                expected,
                observed
            );
            MismatchSnafu {
                what,
                expected,
                observed,
            }
            .fail()
        }
    }
}
