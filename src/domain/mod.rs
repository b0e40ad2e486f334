//! Domain types and pure logic: no Bluetooth I/O lives here.

pub mod heart_rate;
pub mod models;
pub mod settings;
pub mod simulator;
