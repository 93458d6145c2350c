//! Turns browser events into attributed time. Pure logic with no I/O: the
//! [reconciler::Reconciler] returns effects and the processing module applies them.

pub mod clock;
pub mod reconciler;
