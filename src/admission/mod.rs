//! Admission façade consumed by the surrounding framework.

mod decision;
mod gate;

pub use decision::Decision;
pub use gate::{Gate, RedisGate};
