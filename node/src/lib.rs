// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod app;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod executor;
pub mod fault;
pub mod handshake;
pub mod mempool;
pub mod node;
pub mod persistence;
pub mod privval;
pub mod recovery;
pub mod telemetry;
pub mod test_utils;
pub mod ticker;
pub mod wal_reader;
pub mod wal_writer;
