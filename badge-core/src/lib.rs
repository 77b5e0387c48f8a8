#![no_std]

// Shared logic for the badge scheduler, power manager and service loader.
//
// This crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library and exposing abstractions the other crates can adopt.

pub mod power;
pub mod scheduler;
pub mod services;
pub mod telemetry;
