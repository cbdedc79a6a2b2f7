pub mod classify;
pub mod event;
pub mod normalize;

pub use classify::{MessageClassifier, PatternClassifier};
pub use event::*;
pub use normalize::{normalize, normalize_all, normalize_line};

#[cfg(any(test, feature = "testing"))]
pub mod testing;
