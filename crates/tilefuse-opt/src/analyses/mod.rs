mod shape;

pub use shape::*;
