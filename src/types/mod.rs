pub mod bar;
pub mod regime;
pub mod prediction;

pub use bar::*;
pub use regime::*;
pub use prediction::*;
