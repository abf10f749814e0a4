// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Firmware milestones signaled on the management GPIO.
//!
//! Firmware reports progress by writing the management GPIO high and then low
//! again. A pulse is only complete once both transitions have been seen, so a
//! lone rising edge never counts.

use crate::{CaravelEnv, Level, PulseCountSnafu, TestFailure};

/// A tally of complete high-then-low pulses.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug, Default)]
pub struct PulseCount(usize);

impl PulseCount {
    pub fn get(self) -> usize {
        self.0
    }

    /// Fails with [`TestFailure::PulseCount`] unless exactly `expected` pulses
    /// were observed.
    pub fn expect(
        self,
        env: &CaravelEnv<'_>,
        expected: usize,
        milestone: &str,
    ) -> Result<(), TestFailure> {
        if self.0 == expected {
            return Ok(());
        }

        log::error!(
            target: env.test_name(),
            "[TEST] FAIL - {}: expected {} pulse(s), observed {}",
            milestone,
            expected,
            self.0
        );
        PulseCountSnafu {
            milestone,
            expected,
            observed: self.0,
        }
        .fail()
    }
}

/// Blocks until one complete pulse has been observed.
pub fn wait_for_pulse(env: &mut CaravelEnv<'_>) -> Result<(), TestFailure> {
    env.wait_mgmt_gpio(Level::High)?;
    env.wait_mgmt_gpio(Level::Low)
}

/// Blocks until `count` complete pulses have been observed, then logs `label`.
pub fn wait_for_pulses(
    env: &mut CaravelEnv<'_>,
    count: usize,
    label: &str,
) -> Result<PulseCount, TestFailure> {
    for _ in 0..count {
        wait_for_pulse(env)?;
    }
    log::info!(target: env.test_name(), "[TEST] {}", label);
    Ok(PulseCount(count))
}

/// Counts pulses until `count` have been observed or the cycle budget runs
/// out, whichever comes first. The timeout itself is logged by the
/// environment; the short tally is returned for the caller to judge.
pub fn tally_pulses(env: &mut CaravelEnv<'_>, count: usize) -> PulseCount {
    let mut tally = PulseCount::default();
    while tally.0 < count {
        if wait_for_pulse(env).is_err() {
            break;
        }
        tally.0 += 1;
    }
    tally
}
