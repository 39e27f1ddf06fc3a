//! OS-facing network plumbing: subprocesses, interfaces, neighbor cache and probes

pub mod command;
pub mod interfaces;
pub mod neighbor;
pub mod probe;

pub use command::{CommandOutput, CommandRunner, SystemCommandRunner};
pub use interfaces::InterfaceEnumerator;
pub use neighbor::{discover_subnets, parse_neighbor_table, NeighborEntry};
pub use probe::{first_open_port, tcp_probe, Pinger};
