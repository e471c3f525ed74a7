use thiserror::Error;

#[derive(Debug, Error)]
pub enum Tmc260Error {
    #[error("Field {0} only accepts 0 or 1. Received: {1}")]
    InvalidBitField(&'static str, u8),
    #[error("SPI bus error during datagram exchange.")]
    Bus,
}
