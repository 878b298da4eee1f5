pub mod memory;
pub mod reducers;
pub mod report;
pub mod runner;
pub mod suite;

/* --------- Re-exports de los tipos compartidos --------- */

pub use memory::{attribute, MemoryAccountingError, MemoryTool, PeakMeasurement, PeakMemory};
pub use reducers::{Atom, DdOptions, Perses, Picire, Picireny, Reducer};
pub use report::{dump_stats, kbytes, nws_size, read_stats, ReductionStats};
pub use runner::{CommandRunner, SystemRunner};
pub use suite::{Suite, TestCase};
