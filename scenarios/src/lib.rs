// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Firmware testbenches for the Caravel user project.
//!
//! Each testbench releases the management core, follows the firmware through
//! its milestones on the management GPIO, and checks what it transmits on the
//! user UARTs. Recorded firmware activity for each lives under `stimulus/`.

use caravel_harness::scenario::Scenario;


pub use basic_test::basic_test;
pub use system_test::system_test;
pub use uart0_test::uart0_test;
pub use uart1_test::uart1_test;

pub const BAUD_RATE: u32 = 115_200;

pub const UART0_TX: usize = 7;
pub const UART0_RX: usize = 6;

pub const UART1_TX: usize = 9;
pub const UART1_RX: usize = 8;

/// Every testbench in this crate.
pub fn all() -> [&'static dyn Scenario; 4] {
    [basic_test, uart0_test, uart1_test, system_test]
}

/// Looks up a testbench by name.
pub fn find(name: &str) -> Option<&'static dyn Scenario> {
    all().into_iter().find(|scenario| scenario.name() == name)
}
