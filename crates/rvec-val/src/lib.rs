mod types;
pub use types::*;

mod scalar;
pub use scalar::*;

mod sharing;
pub use sharing::*;

mod shared;
pub use shared::*;
