pub mod account;
pub mod check;
pub mod job;
