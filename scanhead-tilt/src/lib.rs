#![no_std]

#[cfg(test)]
extern crate std;

mod fmt;

pub mod config;
pub mod controller;
pub mod position;
pub mod profile;
pub mod telemetry;
pub mod timer;
