mod clock;
mod id;

pub use clock::*;
pub use id::*;

use rand::{distributions::Alphanumeric, thread_rng, Rng};

/// Length of generated document ids, matching the managed store's own auto ids.
pub const AUTO_ID_LENGTH: usize = 20;

pub fn random_string(length: usize) -> String {
    let mut rng = thread_rng();

    std::iter::repeat(())
        .map(|_| rng.sample(Alphanumeric) as char)
        .take(length)
        .collect()
}

/// Returns a fresh document id.
pub fn auto_id() -> String {
    random_string(AUTO_ID_LENGTH)
}
