pub mod engines;
pub mod tasks;
pub mod workflows;
