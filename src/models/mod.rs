pub mod category;
pub mod config;
pub mod incident;
pub mod memo;
pub mod run;
pub mod segment;

pub use category::*;
pub use config::*;
pub use incident::*;
pub use memo::*;
pub use run::*;
pub use segment::*;
