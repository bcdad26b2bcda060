//! Internal implementation details.

pub(crate) mod circular;

pub(crate) use circular::find_cycle;
