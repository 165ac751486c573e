//! 命令定义和实现

pub mod deadline;
pub mod list;
pub mod param;
pub mod read;
pub mod set;

pub use deadline::DeadlineCommand;
pub use list::ListCommand;
pub use param::ParamCommand;
pub use read::ReadCommand;
pub use set::SetCommand;
