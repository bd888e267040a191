//! Common utilities shared by the experiment binaries and the test suites.
//!
//! - **`data_loader`**: parses sparse symmetric matrices from triplet files.
//! - **`perf`**: basis memory accounting and the peak memory reading on Linux.
//! - **`scenarios`**: synthetic diagonal operators with known spectra.
//! - **`verify`**: dense reconstruction and orthogonality checks for small problems.

pub mod data_loader;
pub mod perf;
pub mod scenarios;
pub mod verify;
