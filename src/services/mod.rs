pub mod prompts;
pub mod repair;

pub use repair::{repair, JsonObject, Repaired, RepairStep};
