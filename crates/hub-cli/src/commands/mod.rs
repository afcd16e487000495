pub mod dispatch;
pub mod executions;
pub mod init;
pub mod interface;
pub mod library;
pub mod lineage;
pub mod scheduler;
pub mod schema;
pub mod shared;
pub mod task;
