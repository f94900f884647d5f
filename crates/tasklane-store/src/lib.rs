pub mod memory;
pub mod pg;

pub use memory::InMemoryStore;
pub use pg::{PgLedgerStore, PgNotifier, PgPaymentLog, PgPayoutStore};
