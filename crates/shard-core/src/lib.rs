pub mod config;
pub mod error;
pub mod logging;
pub mod random;
pub mod types;

pub use error::{ShardError, ShardResult};
pub use random::{OsRandom, RandomSource, SeededRandom};
