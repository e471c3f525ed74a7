//! Chip-select-framed, byte-synchronous exchange of one datagram.

use core::convert::Infallible;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

use crate::errors::Tmc260Error;

/// Blocking exchange of one three-byte datagram.
///
/// The bytes clocked back are the chip's response to the *previous*
/// transaction; the TMC260 shifts its answer out while the next command
/// shifts in, so every read lags one exchange behind.
///
/// The waits inside an exchange are bounded only by the hardware shifter;
/// a wedged bus hangs the caller.
pub trait DatagramBus {
    fn exchange(&mut self, tx: [u8; 3]) -> Result<[u8; 3], Tmc260Error>;
}

/// Settling time for the TMC260's internal oscillator, which is not
/// reflected on the serial clock. Empirically tuned; do not shave it.
pub const SETTLE_DELAY_US: u32 = 4;

/// Settle periods observed after the last bit and again after chip-select
/// release.
pub const RELEASE_GUARD_PERIODS: u32 = 8;

/// SPI transport with a software-driven active-low chip select.
pub struct SpiTransport<SPI, CS, D> {
    spi: SPI,
    cs: CS,
    delay: D,
}

impl<SPI, CS, D> SpiTransport<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin<Error = Infallible>,
    D: DelayNs,
{
    /// The chip select must start deasserted (high).
    pub fn new(spi: SPI, cs: CS, delay: D) -> Self {
        Self { spi, cs, delay }
    }
}

impl<SPI, CS, D> DatagramBus for SpiTransport<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin<Error = Infallible>,
    D: DelayNs,
{
    fn exchange(&mut self, tx: [u8; 3]) -> Result<[u8; 3], Tmc260Error> {
        let mut rx = [0u8; 3];

        self.delay.delay_us(SETTLE_DELAY_US);
        self.cs.set_low().unwrap();
        self.delay.delay_us(SETTLE_DELAY_US);

        // One word at a time: each transfer blocks until the byte has
        // fully shifted and hands back the byte echoed alongside it.
        for (tx_byte, rx_byte) in tx.iter().zip(rx.iter_mut()) {
            let mut word = [*tx_byte];
            self.spi
                .transfer_in_place(&mut word)
                .map_err(|_| Tmc260Error::Bus)?;
            *rx_byte = word[0];
        }

        // Chip select may only rise once the shifter is idle. Releasing on
        // elapsed time alone corrupts the next transaction.
        self.spi.flush().map_err(|_| Tmc260Error::Bus)?;
        for _ in 0..RELEASE_GUARD_PERIODS {
            self.delay.delay_us(SETTLE_DELAY_US);
        }
        self.cs.set_high().unwrap();
        for _ in 0..RELEASE_GUARD_PERIODS {
            self.delay.delay_us(SETTLE_DELAY_US);
        }

        Ok(rx)
    }
}
