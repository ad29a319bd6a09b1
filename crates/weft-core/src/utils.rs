//! Small syntax helpers shared by the matcher and the weaver.

pub mod paths;

#[doc(inline)]
pub use paths::last_segment_ident;
