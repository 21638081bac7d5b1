pub mod types;
pub mod worker;
