#![forbid(unsafe_code)]

mod cell_tx;
mod event_tx;
mod schema;
mod time;

pub(super) use self::cell_tx::*;
pub(super) use self::event_tx::*;
pub(super) use self::schema::migrate_sqlite_schema;
pub(super) use self::time::*;
pub use self::time::now_ms;
