pub mod aggregation;
pub mod interval;
