pub mod enums;
pub mod prediction;
pub mod retraining;
pub mod scan;

pub use enums::*;
pub use prediction::*;
pub use retraining::*;
pub use scan::*;
