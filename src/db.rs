pub mod table;
pub use table::{ItemChange, ItemTable, PageRequest, RawPage, TableError};
pub mod memory_table;
pub use memory_table::MemoryTable;
pub mod dynamo_table;
pub use dynamo_table::DynamoTable;
pub mod pg_table;
pub use pg_table::PgTable;
