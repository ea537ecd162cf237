mod commit;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;
mod validate;

pub use conflict::now_ms;
pub use error::EngineError;
pub use store::{RoomTxn, SharedRoomState, Store, StoreOptions};
pub use validate::{format_instant, parse_instant, validate};

use std::sync::Arc;

/// Booking engine: validation, the atomic create unit, cancellation and queries
/// over one `Store`.
///
/// Cheap to clone; clones share the store.
#[derive(Clone)]
pub struct Engine {
    store: Arc<Store>,
}

impl Engine {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }
}
