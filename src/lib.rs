pub mod accum;
pub mod camera;
pub mod config;
pub mod error;
pub mod frame;
pub mod grid;
pub mod render;
pub mod rng;
pub mod scene;
pub mod timing;
pub mod vk;

pub use config::{RendererConfig, SceneConfig, COARSE_FACTOR, MAX_SPHERES};
pub use error::{RendererError, Result};
