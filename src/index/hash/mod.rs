pub mod bucket_page;
pub mod codec;
pub mod directory_page;
pub mod error;
mod table;

pub use codec::SlotValue;
pub use error::HashTableError;
pub use table::ExtendibleHashTable;
