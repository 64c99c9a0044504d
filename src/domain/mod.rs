//! Domain types shared by the BLE engine and the CLI.

pub mod models;
pub mod settings;
