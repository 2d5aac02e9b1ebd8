// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
#![no_std]

//! cairn-kernel: the deterministic, no_std core of a crash-recoverable BFT
//! consensus engine. Data model, WAL message model, round state and the
//! transition function that both live consensus and startup replay run through.

extern crate alloc;

#[cfg(any(test, feature = "std"))]
#[macro_use]
extern crate std;

pub mod error;
pub mod types;
pub mod wal;
pub mod state;

#[cfg(test)]
pub mod tests;
