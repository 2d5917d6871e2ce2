pub mod groups;
pub mod lag_calculator;
pub mod offset_collector;
pub mod scheduler;

pub use scheduler::CollectionScheduler;
