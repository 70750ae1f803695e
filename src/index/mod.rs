pub mod extendible;

pub use extendible::{ConcurrentExtendibleTable, ExtendibleTable, TableMetrics};
