mod firestore;
mod memory;

pub use firestore::*;
pub use memory::*;
