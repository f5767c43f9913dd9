pub mod chart;
pub mod plan;
pub mod select;
pub mod snapshot;
pub mod window;
