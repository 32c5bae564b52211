use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::error::{RendererError, Result};

/// Fine cells per coarse cell along each axis.
pub const COARSE_FACTOR: u32 = 4;

/// Upper bound on spheres per scene; sizes the `=` key and config validation.
pub const MAX_SPHERES: u32 = 65_536;

pub const MAX_FRAMES_IN_FLIGHT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "sphere-rt")]
#[command(about = "Progressive compute ray tracer over a uniform sphere grid")]
pub struct RendererConfig {
    /// Number of spheres to place
    #[arg(long = "spheres", default_value_t = 4096)]
    pub sphere_target_count: u32,

    /// Smallest sphere radius
    #[arg(long = "min-radius", default_value_t = 0.15)]
    pub sphere_min_radius: f32,

    /// Largest sphere radius
    #[arg(long = "max-radius", default_value_t = 0.45)]
    pub sphere_max_radius: f32,

    /// Spheres per unit of ground area (defaults to one per 3*max-radius cell)
    #[arg(long)]
    pub density: Option<f32>,

    /// Placement seed
    #[arg(long, default_value_t = 0x1234_5678)]
    pub seed: u32,

    /// Overlay the fine grid on the ground plane
    #[arg(long)]
    pub show_grid: bool,

    #[arg(long, default_value_t = 2)]
    pub frames_in_flight: usize,

    /// Directory holding raytrace.comp.spv, blit.vert.spv and blit.frag.spv
    #[arg(long, default_value = "shaders")]
    pub shader_dir: PathBuf,

    #[arg(long, default_value_t = 1280)]
    pub width: u32,

    #[arg(long, default_value_t = 720)]
    pub height: u32,

    /// Enable VK_LAYER_KHRONOS_validation
    #[arg(long)]
    pub validation: bool,

    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            sphere_target_count: 4096,
            sphere_min_radius: 0.15,
            sphere_max_radius: 0.45,
            density: None,
            seed: 0x1234_5678,
            show_grid: false,
            frames_in_flight: 2,
            shader_dir: PathBuf::from("shaders"),
            width: 1280,
            height: 720,
            validation: false,
            log_level: None,
        }
    }
}

impl RendererConfig {
    pub fn validate(&self) -> Result<()> {
        let radii = [self.sphere_min_radius, self.sphere_max_radius];
        if radii.iter().any(|r| !r.is_finite() || *r < 0.0) {
            return Err(RendererError::Config(format!(
                "sphere radii must be finite and non-negative (got {} / {})",
                self.sphere_min_radius, self.sphere_max_radius
            )));
        }
        if self.sphere_max_radius < self.sphere_min_radius {
            return Err(RendererError::Config(format!(
                "max-radius {} is smaller than min-radius {}",
                self.sphere_max_radius, self.sphere_min_radius
            )));
        }
        if let Some(density) = self.density {
            if !density.is_finite() || density <= 0.0 {
                return Err(RendererError::Config(format!(
                    "density must be positive (got {density})"
                )));
            }
        }
        if self.sphere_target_count > MAX_SPHERES {
            return Err(RendererError::Config(format!(
                "at most {MAX_SPHERES} spheres are supported (got {})",
                self.sphere_target_count
            )));
        }
        if !(1..=MAX_FRAMES_IN_FLIGHT).contains(&self.frames_in_flight) {
            return Err(RendererError::Config(format!(
                "frames-in-flight must be 1..={MAX_FRAMES_IN_FLIGHT} (got {})",
                self.frames_in_flight
            )));
        }
        Ok(())
    }

    pub fn scene_config(&self) -> SceneConfig {
        SceneConfig {
            target_count: self.sphere_target_count,
            min_radius: self.sphere_min_radius,
            max_radius: self.sphere_max_radius,
            density: self.density,
            seed: self.seed,
        }
    }
}

/// Inputs to scene generation and spawn-area sizing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneConfig {
    pub target_count: u32,
    pub min_radius: f32,
    pub max_radius: f32,
    /// `None` means one sphere per `(3 * max_radius)^2`.
    pub density: Option<f32>,
    pub seed: u32,
}

impl SceneConfig {
    /// Radii after the generator's fallbacks are applied.
    pub fn sanitized_radii(&self) -> (f32, f32) {
        let min = if self.min_radius <= 0.0 {
            0.05
        } else {
            self.min_radius
        };
        let max = self.max_radius.max(min);
        (min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(RendererConfig::default().validate().is_ok());
    }

    #[test]
    fn test_parse_overrides() {
        let cfg = RendererConfig::try_parse_from([
            "sphere-rt",
            "--spheres",
            "100",
            "--min-radius",
            "0.5",
            "--max-radius",
            "1.0",
            "--show-grid",
            "--density",
            "0.25",
        ])
        .unwrap();
        assert_eq!(cfg.sphere_target_count, 100);
        assert!(cfg.show_grid);
        assert_eq!(cfg.density, Some(0.25));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_rejects_inverted_radii() {
        let cfg = RendererConfig {
            sphere_min_radius: 1.0,
            sphere_max_radius: 0.5,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(RendererError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_density() {
        let cfg = RendererConfig {
            density: Some(0.0),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_too_many_frames_in_flight() {
        let cfg = RendererConfig {
            frames_in_flight: MAX_FRAMES_IN_FLIGHT + 1,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_sanitized_radii() {
        let scene = SceneConfig {
            target_count: 1,
            min_radius: 0.0,
            max_radius: 0.01,
            density: None,
            seed: 0,
        };
        assert_eq!(scene.sanitized_radii(), (0.05, 0.05));
    }
}
