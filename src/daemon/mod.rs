//! Long-running process support for `htrk watch`.

pub mod signals;
