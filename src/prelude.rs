pub use crate::ds::AccessHistory;
pub use crate::error::{ConfigError, InvariantError, ReplacerError};
pub use crate::index::{ConcurrentExtendibleTable, ExtendibleTable, TableMetrics};
pub use crate::policy::{ConcurrentLrukReplacer, KDistance, LrukReplacer, ReplacerMetrics};
pub use crate::traits::{FrameId, FrameIndex, Replacer};
