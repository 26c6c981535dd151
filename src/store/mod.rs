//! 会话状态存储：快照结构与内存 / 文件 / SQLite 实现

pub mod file;
pub mod memory;
pub mod sqlite;
pub mod traits;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;
pub use sqlite::SqliteStateStore;
pub use traits::{SessionSnapshot, StateStore, SNAPSHOT_SCHEMA_VERSION};
