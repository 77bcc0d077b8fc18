pub mod build;
pub mod evidence;
pub mod intent;

pub use build::*;
pub use evidence::*;
pub use intent::*;
