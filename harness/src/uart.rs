// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Serial channels on the user I/O pads.
//!
//! Frames are 8N1: a low start bit, eight data bits least significant first,
//! and a high stop bit. Bits are sampled in their middle, so the receiver
//! tolerates a few percent of baud mismatch against the transmitter.

use snafu::{ResultExt, Snafu};

use crate::{CaravelEnv, Level, NoSuchPad, Pin, TestFailure};

pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Clock cycles per serial bit, rounded to the nearest cycle.
pub fn cycles_per_bit(clock_hz: u64, baud_rate: u32) -> u64 {
    let baud_rate = u64::from(baud_rate.max(1));
    (clock_hz.saturating_add(baud_rate / 2) / baud_rate).max(1)
}

/// Invalid [`ChannelBinding`].
#[derive(Debug, Snafu)]
pub enum ChannelBindingError {
    #[snafu(display("Channel {channel} uses an invalid pad: {source}"))]
    InvalidPad { channel: String, source: NoSuchPad },
    #[snafu(display(
        "Channel {channel} uses pad {pin} for both transmit and receive"
    ))]
    SharedPad { channel: String, pin: Pin },
    #[snafu(display("Channel {channel} must have a nonzero baud rate"))]
    ZeroBaudRate { channel: String },
}

/// A named serial channel bound to a transmit/receive pad pair.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct ChannelBinding {
    name: String,
    tx: Pin,
    rx: Pin,
    baud_rate: u32,
}

impl ChannelBinding {
    /// Binds `name` to the pads at indices `tx` and `rx` at
    /// [`DEFAULT_BAUD_RATE`].
    pub fn new(
        name: impl Into<String>,
        tx: usize,
        rx: usize,
    ) -> Result<Self, ChannelBindingError> {
        let name = name.into();
        let tx = Pin::new(tx).context(InvalidPadSnafu { channel: &name })?;
        let rx = Pin::new(rx).context(InvalidPadSnafu { channel: &name })?;
        if tx == rx {
            return SharedPadSnafu {
                channel: name,
                pin: tx,
            }
            .fail();
        }

        Ok(Self {
            name,
            tx,
            rx,
            baud_rate: DEFAULT_BAUD_RATE,
        })
    }

    pub fn with_baud_rate(
        self,
        baud_rate: u32,
    ) -> Result<Self, ChannelBindingError> {
        if baud_rate == 0 {
            return ZeroBaudRateSnafu { channel: self.name }.fail();
        }
        Ok(Self { baud_rate, ..self })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The pad the chip transmits on.
    pub fn tx(&self) -> Pin {
        self.tx
    }

    /// The pad the chip receives on.
    pub fn rx(&self) -> Pin {
        self.rx
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

/// Receives what the chip transmits on a [`ChannelBinding`].
#[derive(Clone, Debug)]
pub struct Uart {
    binding: ChannelBinding,
}

impl Uart {
    pub fn new(binding: ChannelBinding) -> Self {
        Self { binding }
    }

    pub fn binding(&self) -> &ChannelBinding {
        &self.binding
    }

    /// Blocks until one frame has been received and returns its data byte.
    pub fn get_char(&self, env: &mut CaravelEnv<'_>) -> Result<u8, TestFailure> {
        let bit = cycles_per_bit(env.clock_hz(), self.binding.baud_rate);
        let tx = self.binding.tx;
        let waiting_for = format!("a frame on {} ({})", self.binding.name, tx);

        loop {
            env.wait_until(&waiting_for, |model| model.pad(tx) == Level::Low)?;
            env.wait_cycles(bit / 2, &waiting_for)?;
            if env.model().pad(tx) == Level::Low {
                break;
            }
            if env.options().log {
                log::debug!(
                    target: env.test_name(),
                    "Ignoring glitch on {} at cycle {}",
                    tx,
                    env.model().cycle()
                );
            }
        }

        let mut byte = 0u8;
        for index in 0..8 {
            env.wait_cycles(bit, &waiting_for)?;
            if env.model().pad(tx).is_high() {
                byte |= 1 << index;
            }
        }

        env.wait_cycles(bit, &waiting_for)?;
        if env.model().pad(tx) == Level::Low {
            log::warn!(
                target: env.test_name(),
                "Framing error on {}: stop bit of {:#04x} was low",
                self.binding.name,
                byte
            );
        }

        Ok(byte)
    }

    /// Blocks until a newline has been received and returns the line without
    /// its terminator. Carriage returns are dropped.
    pub fn get_line(
        &self,
        env: &mut CaravelEnv<'_>,
    ) -> Result<String, TestFailure> {
        let mut line = vec![];
        loop {
            match self.get_char(env)? {
                b'\n' => break,
                b'\r' => {}
                byte => line.push(byte),
            }
        }

        let line = String::from_utf8_lossy(&line).into_owned();
        if env.options().log {
            log::debug!(
                target: env.test_name(),
                "{} received line {:?}",
                self.binding.name,
                line
            );
        }
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_time_rounds_to_nearest_cycle() {
        assert_eq!(cycles_per_bit(40_000_000, 115_200), 347);
        assert_eq!(cycles_per_bit(10, 4), 3);
        assert_eq!(cycles_per_bit(1, 115_200), 1);
    }

    #[test]
    fn binding_rejects_bad_pads() {
        assert!(ChannelBinding::new("UART0", 7, 6).is_ok());
        assert!(matches!(
            ChannelBinding::new("UART0", 7, 7),
            Err(ChannelBindingError::SharedPad { .. })
        ));
        assert!(matches!(
            ChannelBinding::new("UART0", 40, 6),
            Err(ChannelBindingError::InvalidPad { .. })
        ));
        assert!(matches!(
            ChannelBinding::new("UART0", 7, 6)
                .and_then(|binding| binding.with_baud_rate(0)),
            Err(ChannelBindingError::ZeroBaudRate { .. })
        ));
    }
}
