pub(crate) mod de;
pub mod documents;
pub mod lcd;

pub use documents::*;
pub use lcd::{Transaction, TxsResponse};
