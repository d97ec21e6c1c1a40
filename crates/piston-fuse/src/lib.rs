//! Offload fusion for piston tensor programs.
//!
//! A [`Program`] is an arena of typed instructions grouped into modules. The
//! [`FuseOffload`] pass finds dot, convolution and attention anchors that a
//! specialised backend can run as a single kernel, extracts them (together
//! with their fusible pointwise neighbours) into bypass regions, and replaces
//! the matched subgraph with one `offload` call.
mod classify;
mod config;
mod dce;
mod driver;
mod dtype;
mod enforcer;
pub mod fusion;
mod graph;
mod matcher;
mod op;
pub mod ops;
mod pattern;
mod shape;
mod stride;
mod value;

pub use classify::*;
pub use config::*;
pub use dce::*;
pub use driver::*;
pub use dtype::*;
pub use enforcer::*;
pub use fusion::{FuseError, FusionStats, Rewrite};
pub use graph::*;
pub use matcher::*;
pub use op::*;
pub use pattern::*;
pub use shape::*;
pub use stride::*;
pub use value::*;

#[doc(hidden)]
pub use smallvec;

pub type RVec<T> = smallvec::SmallVec<[T; 4]>;
pub type HashMap<K, V> = std::collections::HashMap<K, V>;
pub type HashSet<K> = std::collections::HashSet<K>;

#[macro_export]
macro_rules! rvec {
    ($($x:tt)*) => {
        $crate::smallvec::smallvec![$($x)*]
    };
}

#[macro_export]
macro_rules! shape {
    ($($x:expr),* $(,)?) => {
        $crate::Shape::new($crate::rvec![$($x),*])
    };
}
