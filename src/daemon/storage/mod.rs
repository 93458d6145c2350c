//!  Statistics are kept in a single JSON document under the `timeData` key.
//!  The basic idea is:
//!   - Every domain has a record with its total time, visits, last visit and time per local day.
//!   - The daily breakdown always sums to the total.
//!   - Keys are stored as files by [kv::FileStore], one file per key.
//!   - Two snapshots are combined with [merge::merge], which is how imports work and how
//!     concurrent writers avoid losing each other's data.

pub mod entities;
pub mod kv;
pub mod merge;
