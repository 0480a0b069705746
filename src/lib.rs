mod zmachine;

pub use crate::zmachine::new_handle;
pub use crate::zmachine::new_story_processor;
pub use crate::zmachine::Handle;
pub use crate::zmachine::LocationObserver;
pub use crate::zmachine::Result;
pub use crate::zmachine::ZErr;
pub use crate::zmachine::ZInput;
pub use crate::zmachine::ZOutput;
pub use crate::zmachine::ZProcessor;
pub use crate::zmachine::ZSnapshot;
pub use crate::zmachine::ZState;
