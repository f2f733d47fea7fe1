pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod reference;
pub mod schema;
pub mod term;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::LedgerConfig;
pub use error::{ErrorCategory, ErrorKind};
pub use events::LedgerEvent;
pub use reference::Reference;
pub use term::TermId;
pub use types::*;
