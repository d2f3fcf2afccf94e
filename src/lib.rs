pub mod participant;
pub mod transaction;
