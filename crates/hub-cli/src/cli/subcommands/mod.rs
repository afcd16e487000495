mod interface;
mod library;
mod lineage;
mod scheduler;
mod task;

pub use interface::InterfaceCommands;
pub use library::LibraryCommands;
pub use lineage::LineageCommands;
pub use scheduler::SchedulerCommands;
pub use task::TaskCommands;
