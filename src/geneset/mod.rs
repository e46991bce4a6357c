//! Gene set collections and competitive set tests

mod camera;
mod collection;

pub use camera::{camera, CameraParams, Direction, GeneSetResult};
pub use collection::{GeneSet, GeneSetCollection};
