pub mod alert;
#[cfg(feature = "display")]
pub mod display;
pub mod settings;
pub mod transform;

pub use alert::CompletionAlert;
#[cfg(feature = "display")]
pub use display::Sdl2Display;
pub use settings::{Setting, ViewSettings};
