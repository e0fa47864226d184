pub mod fits;
pub mod sink;

pub use sink::{FitsEncoder, FrameSink, ImageEncoder, PersistenceSink};
