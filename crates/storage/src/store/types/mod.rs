#![forbid(unsafe_code)]

mod cells;
mod checkpoints;
mod completion;
mod events;
mod export;
mod messages;
mod reservations;
mod reviews;
mod signals;
mod strikes;

pub use cells::*;
pub use checkpoints::*;
pub use completion::*;
pub use events::*;
pub use export::*;
pub use messages::*;
pub use reservations::*;
pub use reviews::*;
pub use signals::*;
pub use strikes::*;
