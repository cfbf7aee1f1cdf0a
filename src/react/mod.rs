//! 认知层：Planner（推理步骤）、Router、ReAct 主循环

pub mod events;
pub mod loop_;
pub mod planner;
pub mod router;

pub use events::ReactEvent;
pub use loop_::{react_loop, ReactResult, ReactSession};
pub use planner::{normalize_request_ids, parse_oracle_output, Planner};
pub use router::{route, Route};
