pub mod translation;
pub use translation::*;

pub mod plugins;
pub use plugins::*;

pub mod null_check;
pub use null_check::*;

pub mod translator;
pub use translator::*;
