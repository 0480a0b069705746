mod addressing;
mod constants;
mod dictionary;
mod handle;
mod header;
mod memory;
mod objects;
mod opcodes;
mod processor;
mod random;
mod result;
mod snapshot;
mod stack;
mod story;
mod traits;
mod variables;
mod version;
mod zscii;

#[cfg(test)]
mod fixtures;

pub use self::handle::{new_handle, Handle};
pub use self::processor::{ZProcessor, ZState};
pub use self::result::{Result, ZErr};
pub use self::snapshot::ZSnapshot;
pub use self::story::new_story_processor;
pub use self::traits::{LocationObserver, ZInput, ZOutput};
