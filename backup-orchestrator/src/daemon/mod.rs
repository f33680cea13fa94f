//! Process lifecycle for the command-line entry points.

pub mod shutdown;

pub use shutdown::ShutdownCoordinator;
