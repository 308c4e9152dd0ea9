//! Math types and logging setup shared by every other module

pub mod logging;
pub mod math;
