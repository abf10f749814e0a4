// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

use caravel_harness::prelude::*;
use caravel_scenarios::{BAUD_RATE, UART0_TX, UART1_TX, system_test};
use snafu::{ResultExt, Whatever};

fn firmware(invalid_address_pulses: usize) -> Stimulus {
    let uart0 = Pin::new(UART0_TX).expect("valid pad");
    let uart1 = Pin::new(UART1_TX).expect("valid pad");
    Stimulus::new()
        .delay(5_000)
        .pulses(3)
        .uart_write(uart0, BAUD_RATE, "UART0: Test\n")
        .delay(1_000)
        .pulses(1)
        .uart_write(uart1, BAUD_RATE, "UART1: Test\n")
        .delay(1_000)
        .pulses(invalid_address_pulses)
}

#[test]
#[snafu::report]
fn two_pulses_pass_the_invalid_address_check() -> Result<(), Whatever> {
    let _ = colog::default_builder().try_init();

    let report = Report::new();
    let mut chip = firmware(2).into_chip();
    run_scenario(system_test, &mut chip, &report)
        .whatever_context("invalid address check passes")?;

    Ok(())
}

#[test]
fn one_pulse_fails_the_invalid_address_check() {
    let _ = colog::default_builder().try_init();

    let report = Report::new();
    let mut chip = firmware(1).into_chip();
    let failure = run_scenario(system_test, &mut chip, &report)
        .expect_err("one pulse is not enough");

    assert!(matches!(
        failure,
        TestFailure::PulseCount {
            expected: 2,
            observed: 1,
            ..
        }
    ));
    let record = report.get("system_test").expect("outcome was recorded");
    assert_eq!(record.cycles, 3_000_000);
}

#[test]
fn uarts_out_of_order_fail_on_uart0() {
    let _ = colog::default_builder().try_init();

    let uart0 = Pin::new(UART0_TX).expect("valid pad");
    let mut chip = Stimulus::new()
        .pulses(3)
        .uart_write(uart0, BAUD_RATE, "UART1: Test\n")
        .pulses(3)
        .into_chip();
    let failure = run_scenario(system_test, &mut chip, &Report::new())
        .expect_err("UART0 carried the UART1 message");

    assert_eq!(
        failure.to_string(),
        "UART0 expected 'UART0: Test', got 'UART1: Test'"
    );
}
