pub mod analytics;
pub mod attendance;
pub mod backup_exchange;
pub mod batches;
pub mod core;
pub mod dashboard;
pub mod expenses;
pub mod fees;
pub mod orgs;
pub mod students;
pub mod tests;
