pub mod docker;
pub mod runtime;
pub mod state;
pub mod types;

#[cfg(test)]
pub(crate) mod fake;
