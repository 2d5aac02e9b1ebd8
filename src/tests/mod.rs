// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod support;
pub mod block_tests;
pub mod machine_tests;
pub mod determinism_tests;
