//! Command-line surface for the demo binary, in the teacher's clap-derive
//! style (`examples/mstange-samply/samply/src/cli.rs`).

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "dispatch-demo",
    version,
    about = "Drives a few ticks of the message dispatch core on a single node."
)]
pub struct DemoArgs {
    /// Worker threads in the (single) simulation group.
    #[arg(long, default_value_t = 4)]
    pub threads: usize,

    /// Nodes in the group. Values above 1 only make sense with the `mpi`
    /// feature enabled and the binary launched under `mpirun`.
    #[arg(long, default_value_t = 1)]
    pub nodes: usize,

    /// Capacity, in bytes, of each group's merged inbound buffer.
    #[arg(long, default_value_t = 2_000_000)]
    pub block_size: usize,

    /// Number of ticks to run before printing the final report.
    #[arg(long, default_value_t = 3)]
    pub ticks: u32,

    /// Messages each thread appends per tick.
    #[arg(long, default_value_t = 16)]
    pub messages_per_thread: u32,
}
