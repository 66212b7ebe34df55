mod cache;
mod layout;
mod window;

pub use cache::*;
pub use layout::*;
pub use window::*;
