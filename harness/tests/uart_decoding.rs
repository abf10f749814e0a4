// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

use std::env;

use caravel_harness::{prelude::*, uart::cycles_per_bit};
use snafu::{ResultExt, Whatever};

fn init_logging() {
    if env::var("RUST_LOG").is_ok() {
        let _ = env_logger::try_init();
    }
}

fn pin(index: usize) -> Pin {
    Pin::new(index).expect("valid pad")
}

fn uart(name: &str, tx: usize, rx: usize) -> Uart {
    Uart::new(
        ChannelBinding::new(name, tx, rx)
            .and_then(|binding| binding.with_baud_rate(115_200))
            .expect("valid binding"),
    )
}

/// Drives one 8N1 frame by hand so the stop bit can be chosen freely.
fn raw_frame(stimulus: Stimulus, tx: Pin, byte: u8, stop: Level) -> Stimulus {
    let bit = cycles_per_bit(stimulus.clock_hz(), 115_200);
    let mut stimulus = stimulus.pad(tx, Level::Low).delay(bit);
    for index in 0..8 {
        stimulus = stimulus
            .pad(tx, Level::from(byte & (1 << index) != 0))
            .delay(bit);
    }
    stimulus.pad(tx, stop).delay(bit)
}

#[test]
#[snafu::report]
fn decodes_a_line_without_its_terminator() -> Result<(), Whatever> {
    init_logging();

    let mut chip = Stimulus::new()
        .delay(1_000)
        .uart_write(pin(7), 115_200, "Hello UART0\r\n")
        .into_chip();
    let mut env = configure(&mut chip, "line", 100_000);
    env.release_csb();

    let line = uart("UART0", 7, 6)
        .get_line(&mut env)
        .whatever_context("line was transmitted")?;
    assert_eq!(line, "Hello UART0");

    Ok(())
}

#[test]
#[snafu::report]
fn tolerates_the_firmware_prescaler_rate() -> Result<(), Whatever> {
    init_logging();

    // prescaler 42 at 40 MHz is about 116 kBd
    let mut chip = Stimulus::new()
        .uart_write(pin(9), 116_279, "UART1: Test\n")
        .into_chip();
    let mut env = configure(&mut chip, "prescaler", 100_000);
    env.release_csb();

    let line = uart("UART1", 9, 8)
        .get_line(&mut env)
        .whatever_context("line was transmitted")?;
    assert_eq!(line, "UART1: Test");

    Ok(())
}

#[test]
#[snafu::report]
fn channels_only_see_their_own_pad() -> Result<(), Whatever> {
    init_logging();

    let mut chip = Stimulus::new()
        .uart_write(pin(7), 115_200, "zero\n")
        .uart_write(pin(9), 115_200, "one\n")
        .into_chip();
    let mut env = configure(&mut chip, "channels", 200_000);
    env.release_csb();

    let line = uart("UART1", 9, 8)
        .get_line(&mut env)
        .whatever_context("UART1 line")?;
    assert_eq!(line, "one");

    Ok(())
}

#[test]
#[snafu::report]
fn short_glitches_are_not_start_bits() -> Result<(), Whatever> {
    init_logging();

    let tx = pin(7);
    let mut chip = Stimulus::new()
        .delay(500)
        .pad(tx, Level::Low)
        .delay(20)
        .pad(tx, Level::High)
        .delay(500)
        .uart_write(tx, 115_200, "ok\n")
        .into_chip();
    let mut env = configure(&mut chip, "glitch", 100_000);
    env.release_csb();

    let line = uart("UART0", 7, 6)
        .get_line(&mut env)
        .whatever_context("line after glitch")?;
    assert_eq!(line, "ok");

    Ok(())
}

#[test]
#[snafu::report]
fn frames_are_sampled_mid_bit() -> Result<(), Whatever> {
    init_logging();

    let mut chip = Stimulus::new().uart_write(pin(7), 115_200, "U").into_chip();
    let mut env = configure(&mut chip, "mid_bit", 100_000);
    env.release_csb();

    let byte = uart("UART0", 7, 6)
        .get_char(&mut env)
        .whatever_context("one frame")?;
    assert_eq!(byte, b'U');

    // start bit plus eight data bits plus half of the stop bit
    let bit = cycles_per_bit(env.clock_hz(), 115_200);
    assert_eq!(env.elapsed_cycles(), bit / 2 + 9 * bit);

    Ok(())
}

#[test]
fn unterminated_lines_time_out() {
    init_logging();

    let mut chip = Stimulus::new()
        .uart_write(pin(7), 115_200, "no newline")
        .into_chip();
    let mut env = configure(&mut chip, "unterminated", 100_000);
    env.release_csb();

    let result = uart("UART0", 7, 6).get_line(&mut env);
    assert!(matches!(result, Err(TestFailure::Timeout { .. })));
}

#[test]
#[snafu::report]
fn low_stop_bits_still_deliver_the_byte() -> Result<(), Whatever> {
    init_logging();

    let tx = pin(7);
    let mut chip = raw_frame(Stimulus::new().delay(100), tx, b'A', Level::Low)
        .pad(tx, Level::High)
        .into_chip();
    let mut env = configure(&mut chip, "framing_error", 100_000);
    env.release_csb();

    let byte = uart("UART0", 7, 6)
        .get_char(&mut env)
        .whatever_context("frame with a low stop bit")?;
    assert_eq!(byte, b'A');

    Ok(())
}

#[test]
#[snafu::report]
fn invalid_utf8_is_replaced() -> Result<(), Whatever> {
    init_logging();

    let tx = pin(7);
    let stimulus = raw_frame(Stimulus::new().delay(100), tx, 0xff, Level::High);
    let mut chip = raw_frame(stimulus, tx, b'\n', Level::High).into_chip();
    let mut env = configure(&mut chip, "lossy", 100_000);
    env.release_csb();

    let line = uart("UART0", 7, 6)
        .get_line(&mut env)
        .whatever_context("line with a stray byte")?;
    assert_eq!(line, "\u{fffd}");

    Ok(())
}
