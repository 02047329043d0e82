pub mod stage_agent;
pub mod unit_ctx;

pub use stage_agent::{StageAgent, StageParams, UnitResult};
pub use unit_ctx::UnitCtx;
