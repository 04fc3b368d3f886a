//! First-party extensions shipped with the runtime.

pub mod ranks;
