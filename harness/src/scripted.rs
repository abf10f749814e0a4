// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! A [`ChipModel`] that replays recorded firmware activity.
//!
//! A [`Stimulus`] is a timeline of level changes on the management GPIO and
//! the user I/O pads, measured in clock cycles from the moment CSB is
//! released. It can be built in code or loaded from TOML:
//!
//! ```toml
//! scenario = "uart0_test"
//! clock_hz = 40000000
//!
//! [[step]]
//! delay = 5000
//! [[step]]
//! pulses = 1
//! [[step]]
//! uart = { tx = 7, baud = 115200, text = "Hello UART0\n" }
//! ```
//!
//! Nothing happens on the timeline until [`ChipModel::release_csb`] is
//! called, just as the management core sits idle behind the hold.

use std::fs;

use camino::Utf8Path;
use snafu::{OptionExt, ResultExt, Whatever, whatever};

use crate::{
    ChipModel, Level, MPRJ_IO_COUNT, Pin,
    uart::{DEFAULT_BAUD_RATE, cycles_per_bit},
};

/// Caravel's default 25 ns core clock.
pub const DEFAULT_CLOCK_HZ: u64 = 40_000_000;

/// How long each half of a firmware GPIO pulse lasts by default.
pub const DEFAULT_PULSE_CYCLES: u64 = 40;

/// The most pulses a single stimulus file step may ask for.
pub const MAX_PULSES_PER_STEP: u64 = 1 << 16;

/// Something a stimulus can drive.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum Signal {
    MgmtGpio,
    Pad(Pin),
}

/// `signal` takes `level` at `offset` cycles after CSB release.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct Event {
    pub offset: u64,
    pub signal: Signal,
    pub level: Level,
}

/// A recorded timeline of firmware activity. Every builder method appends at
/// the cursor; [`Stimulus::delay`], [`Stimulus::pulses`], and
/// [`Stimulus::uart_write`] advance it.
#[derive(Clone, Debug)]
pub struct Stimulus {
    scenario: Option<String>,
    clock_hz: u64,
    pulse_cycles: u64,
    cursor: u64,
    events: Vec<Event>,
}

impl Default for Stimulus {
    fn default() -> Self {
        Self {
            scenario: None,
            clock_hz: DEFAULT_CLOCK_HZ,
            pulse_cycles: DEFAULT_PULSE_CYCLES,
            cursor: 0,
            events: vec![],
        }
    }
}

impl Stimulus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names the scenario this stimulus was recorded for.
    pub fn for_scenario(self, scenario: impl Into<String>) -> Self {
        Self {
            scenario: Some(scenario.into()),
            ..self
        }
    }

    /// Only affects bit timing of later [`Stimulus::uart_write`] calls.
    pub fn with_clock_hz(self, clock_hz: u64) -> Self {
        Self { clock_hz, ..self }
    }

    /// Only affects later [`Stimulus::pulses`] calls.
    pub fn with_pulse_cycles(self, pulse_cycles: u64) -> Self {
        Self {
            pulse_cycles,
            ..self
        }
    }

    pub fn scenario(&self) -> Option<&str> {
        self.scenario.as_deref()
    }

    pub fn clock_hz(&self) -> u64 {
        self.clock_hz
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// The cursor position, i.e., cycles from CSB release to the end of the
    /// last advancing step.
    pub fn duration(&self) -> u64 {
        self.cursor
    }

    /// Advances the cursor, saturating at the end of the timeline.
    pub fn delay(mut self, cycles: u64) -> Self {
        self.cursor = self.cursor.saturating_add(cycles);
        self
    }

    /// Drives `signal` to `level` at the cursor without advancing it.
    pub fn drive(mut self, signal: Signal, level: Level) -> Self {
        self.events.push(Event {
            offset: self.cursor,
            signal,
            level,
        });
        self
    }

    pub fn gpio(self, level: Level) -> Self {
        self.drive(Signal::MgmtGpio, level)
    }

    pub fn pad(self, pin: Pin, level: Level) -> Self {
        self.drive(Signal::Pad(pin), level)
    }

    /// `count` complete high-then-low pulses on the management GPIO.
    pub fn pulses(mut self, count: usize) -> Self {
        let width = self.pulse_cycles.max(1);
        for _ in 0..count {
            self = self.gpio(Level::High).delay(width);
            self = self.gpio(Level::Low).delay(width);
        }
        self
    }

    /// Transmits `text` as 8N1 frames on `tx` at `baud_rate`, leaving the pad
    /// idle high afterwards.
    pub fn uart_write(mut self, tx: Pin, baud_rate: u32, text: &str) -> Self {
        let bit = cycles_per_bit(self.clock_hz, baud_rate);
        for byte in text.bytes() {
            self = self.pad(tx, Level::Low).delay(bit);
            for index in 0..8 {
                let level = Level::from(byte & (1 << index) != 0);
                self = self.pad(tx, level).delay(bit);
            }
            self = self.pad(tx, Level::High).delay(bit);
        }
        self
    }

    /// See the [module documentation](self) for the format.
    pub fn from_toml_str(contents: &str) -> Result<Self, Whatever> {
        let document: toml::Value = toml::from_str(contents)
            .whatever_context("Failed to parse stimulus as a valid TOML file")?;

        let mut stimulus = Stimulus::new();
        if let Some(scenario) = document.get("scenario") {
            let scenario = scenario
                .as_str()
                .whatever_context("`scenario` must be a string")?;
            stimulus = stimulus.for_scenario(scenario);
        }
        if let Some(clock_hz) = document.get("clock_hz") {
            let clock_hz = read_integer(clock_hz, "clock_hz")?;
            if clock_hz == 0 {
                whatever!("`clock_hz` must be positive");
            }
            stimulus = stimulus.with_clock_hz(clock_hz);
        }
        if let Some(pulse_cycles) = document.get("pulse_cycles") {
            stimulus = stimulus
                .with_pulse_cycles(read_integer(pulse_cycles, "pulse_cycles")?);
        }

        let steps = document
            .get("step")
            .map(|steps| {
                steps
                    .as_array()
                    .whatever_context("`step` must be an array of tables")
            })
            .transpose()?;
        for (index, step) in steps.into_iter().flatten().enumerate() {
            stimulus = apply_step(stimulus, step)
                .whatever_context(format!("Invalid step {index}"))?;
        }

        Ok(stimulus)
    }

    pub fn from_toml_file(path: &Utf8Path) -> Result<Self, Whatever> {
        let contents = fs::read_to_string(path).whatever_context(format!(
            "Failed to read stimulus file at {path}"
        ))?;
        Self::from_toml_str(&contents)
            .whatever_context(format!("Failed to load stimulus from {path}"))
    }

    /// Builds a chip that replays this stimulus.
    pub fn into_chip(self) -> ScriptedChip {
        let mut events = self.events;
        events.sort_by_key(|event| event.offset);
        ScriptedChip {
            name: self.scenario.unwrap_or_else(|| "scripted chip".into()),
            clock_hz: self.clock_hz,
            cycle: 0,
            released_at: None,
            events,
            next_event: 0,
            mgmt_gpio: Level::Low,
            pads: [Level::High; MPRJ_IO_COUNT],
        }
    }
}

fn read_integer(value: &toml::Value, what: &str) -> Result<u64, Whatever> {
    value
        .as_integer()
        .and_then(|value| u64::try_from(value).ok())
        .whatever_context(format!("`{what}` must be a non-negative integer"))
}

fn read_level(value: &toml::Value, what: &str) -> Result<Level, Whatever> {
    match value {
        toml::Value::Boolean(level) => Ok(Level::from(*level)),
        toml::Value::Integer(0) => Ok(Level::Low),
        toml::Value::Integer(1) => Ok(Level::High),
        _ => whatever!("`{}` must be 0, 1, true, or false", what),
    }
}

fn read_pin(value: &toml::Value, what: &str) -> Result<Pin, Whatever> {
    let index = read_integer(value, what)?;
    Pin::new(index as usize).whatever_context(format!("`{what}` is invalid"))
}

/// Fails unless advancing the cursor of `stimulus` by `cycles` fits in the
/// timeline. `None` means computing `cycles` already overflowed.
fn ensure_fits(
    stimulus: &Stimulus,
    cycles: Option<u64>,
    what: &str,
) -> Result<(), Whatever> {
    if cycles
        .and_then(|cycles| stimulus.cursor.checked_add(cycles))
        .is_none()
    {
        whatever!("`{}` overflows the timeline", what);
    }
    Ok(())
}

fn apply_step(
    stimulus: Stimulus,
    step: &toml::Value,
) -> Result<Stimulus, Whatever> {
    let table = step
        .as_table()
        .whatever_context("Each step must be a table")?;
    let mut actions = table.iter();
    let (Some((action, value)), None) = (actions.next(), actions.next())
    else {
        whatever!("Each step must have exactly one action");
    };

    Ok(match action.as_str() {
        "delay" => {
            let cycles = read_integer(value, "delay")?;
            ensure_fits(&stimulus, Some(cycles), "delay")?;
            stimulus.delay(cycles)
        }
        "pulses" => {
            let count = read_integer(value, "pulses")?;
            if count > MAX_PULSES_PER_STEP {
                whatever!(
                    "`pulses` may be at most {} per step, got {}",
                    MAX_PULSES_PER_STEP,
                    count
                );
            }
            let period = stimulus.pulse_cycles.max(1).checked_mul(2);
            ensure_fits(
                &stimulus,
                period.and_then(|period| period.checked_mul(count)),
                "pulses",
            )?;
            stimulus.pulses(count as usize)
        }
        "gpio" => stimulus.gpio(read_level(value, "gpio")?),
        "pad" => {
            let pin = value
                .get("pin")
                .whatever_context("`pad` requires a `pin`")?;
            let level = value
                .get("level")
                .whatever_context("`pad` requires a `level`")?;
            stimulus.pad(read_pin(pin, "pad.pin")?, read_level(level, "pad.level")?)
        }
        "uart" => {
            let tx = value
                .get("tx")
                .whatever_context("`uart` requires a `tx` pad")?;
            let baud_rate = match value.get("baud") {
                Some(baud) => u32::try_from(read_integer(baud, "uart.baud")?)
                    .ok()
                    .filter(|baud| *baud > 0)
                    .whatever_context("`uart.baud` is out of range")?,
                None => DEFAULT_BAUD_RATE,
            };
            let text = value
                .get("text")
                .and_then(|text| text.as_str())
                .whatever_context("`uart` requires a `text` string")?;
            let bit = cycles_per_bit(stimulus.clock_hz, baud_rate);
            let frames = u64::try_from(text.len())
                .ok()
                .and_then(|bytes| bytes.checked_mul(10));
            ensure_fits(
                &stimulus,
                frames.and_then(|frames| frames.checked_mul(bit)),
                "uart",
            )?;
            stimulus.uart_write(read_pin(tx, "uart.tx")?, baud_rate, text)
        }
        other => whatever!("Unknown action `{}`", other),
    })
}

/// Replays a [`Stimulus`]. Pads idle high and the management GPIO starts low.
#[derive(Clone, Debug)]
pub struct ScriptedChip {
    name: String,
    clock_hz: u64,
    cycle: u64,
    released_at: Option<u64>,
    events: Vec<Event>,
    next_event: usize,
    mgmt_gpio: Level,
    pads: [Level; MPRJ_IO_COUNT],
}

impl ScriptedChip {
    /// Whether CSB has been released.
    pub fn is_released(&self) -> bool {
        self.released_at.is_some()
    }

    /// Whether every event on the timeline has been applied.
    pub fn is_exhausted(&self) -> bool {
        self.next_event == self.events.len()
    }

    fn apply_due_events(&mut self) {
        let Some(released_at) = self.released_at else {
            return;
        };
        let now = self.cycle - released_at;
        while let Some(event) = self.events.get(self.next_event) {
            if event.offset > now {
                break;
            }
            match event.signal {
                Signal::MgmtGpio => self.mgmt_gpio = event.level,
                Signal::Pad(pin) => self.pads[pin.index()] = event.level,
            }
            self.next_event += 1;
        }
    }
}

impl ChipModel for ScriptedChip {
    fn name(&self) -> &str {
        &self.name
    }

    fn clock_hz(&self) -> u64 {
        self.clock_hz
    }

    fn cycle(&self) -> u64 {
        self.cycle
    }

    fn step(&mut self) {
        self.cycle += 1;
        self.apply_due_events();
    }

    fn release_csb(&mut self) {
        if self.released_at.is_none() {
            self.released_at = Some(self.cycle);
            self.apply_due_events();
        }
    }

    fn mgmt_gpio(&self) -> Level {
        self.mgmt_gpio
    }

    fn pad(&self, pin: Pin) -> Level {
        self.pads[pin.index()]
    }
}
