use glam::Vec3;

use crate::config::SceneConfig;
use crate::rng::WangRng;

pub const MAX_PLACEMENT_ATTEMPTS: u32 = 1024;
pub const GROUND_Y: f32 = 0.0;

/// Scenes smaller than this still get a footprint sized for this many spheres.
const MIN_SPAWN_COUNT: u32 = 16;
const MAX_PLACEMENT_CELLS_PER_AXIS: usize = 1024;
const EMPTY: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    pub center: Vec3,
    pub radius: f32,
    pub albedo: Vec3,
}

impl Sphere {
    pub fn center_radius(&self) -> [f32; 4] {
        [self.center.x, self.center.y, self.center.z, self.radius]
    }

    pub fn albedo_rgba(&self) -> [f32; 4] {
        [self.albedo.x, self.albedo.y, self.albedo.z, 1.0]
    }
}

/// Square XZ footprint the generator scatters spheres over.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnArea {
    pub min_x: f32,
    pub max_x: f32,
    pub min_z: f32,
    pub max_z: f32,
    pub ground_y: f32,
}

impl SpawnArea {
    /// Footprint of area `count / density`, centred on the origin.
    pub fn compute(cfg: &SceneConfig) -> Self {
        let radius = if cfg.max_radius > 0.0 {
            cfg.max_radius
        } else {
            0.25
        };
        let base_cell = radius * 3.0;
        let density = cfg
            .density
            .filter(|d| *d > 0.0)
            .unwrap_or(1.0 / (base_cell * base_cell));

        let count = cfg.target_count.max(MIN_SPAWN_COUNT) as f32;
        let half = (count / density).sqrt() * 0.5;

        SpawnArea {
            min_x: -half,
            max_x: half,
            min_z: -half,
            max_z: half,
            ground_y: GROUND_Y,
        }
    }

    pub fn width(&self) -> f32 {
        self.max_x - self.min_x
    }

    pub fn depth(&self) -> f32 {
        self.max_z - self.min_z
    }
}

/// Outcome of one scene generation. `spheres.len()` can fall short of
/// `requested` when the footprint is too crowded.
#[derive(Debug, Clone, Default)]
pub struct Placement {
    pub spheres: Vec<Sphere>,
    pub requested: u32,
    pub attempts: u64,
}

impl Placement {
    pub fn is_complete(&self) -> bool {
        self.spheres.len() as u32 == self.requested
    }
}

/// XZ spatial hash over the spawn area, buckets as singly-linked lists
/// threaded through `head`/`next`.
pub struct PlacementGrid {
    min_x: f32,
    min_z: f32,
    inv_cell_x: f32,
    inv_cell_z: f32,
    nx: usize,
    nz: usize,
    head: Vec<u32>,
    next: Vec<u32>,
}

impl PlacementGrid {
    /// `cell` must be at least the largest possible sum of two radii so a
    /// 3x3 neighbourhood sees every candidate overlap. Cell counts round
    /// down, so the real cells are never smaller than `cell`.
    pub fn new(area: &SpawnArea, cell: f32, capacity: usize) -> Self {
        let cells_along = |extent: f32| {
            ((extent / cell).floor() as usize).clamp(1, MAX_PLACEMENT_CELLS_PER_AXIS)
        };
        let nx = cells_along(area.width());
        let nz = cells_along(area.depth());

        PlacementGrid {
            min_x: area.min_x,
            min_z: area.min_z,
            inv_cell_x: nx as f32 / area.width().max(f32::MIN_POSITIVE),
            inv_cell_z: nz as f32 / area.depth().max(f32::MIN_POSITIVE),
            nx,
            nz,
            head: vec![EMPTY; nx * nz],
            next: Vec::with_capacity(capacity),
        }
    }

    fn cell_of(&self, x: f32, z: f32) -> (usize, usize) {
        let cx = ((x - self.min_x) * self.inv_cell_x).floor().max(0.0) as usize;
        let cz = ((z - self.min_z) * self.inv_cell_z).floor().max(0.0) as usize;
        (cx.min(self.nx - 1), cz.min(self.nz - 1))
    }

    /// Indices must be inserted densely, in order: 0, 1, 2, ...
    pub fn insert(&mut self, index: u32, x: f32, z: f32) {
        assert_eq!(index as usize, self.next.len(), "placement indices must be dense");
        let (cx, cz) = self.cell_of(x, z);
        let bucket = cz * self.nx + cx;
        self.next.push(self.head[bucket]);
        self.head[bucket] = index;
    }

    /// True if `pred` holds for any index bucketed in the 3x3 cells around `(x, z)`.
    pub fn any_near(&self, x: f32, z: f32, mut pred: impl FnMut(u32) -> bool) -> bool {
        let (cx, cz) = self.cell_of(x, z);
        let x_range = cx.saturating_sub(1)..=(cx + 1).min(self.nx - 1);
        for nz in cz.saturating_sub(1)..=(cz + 1).min(self.nz - 1) {
            for nx in x_range.clone() {
                let mut cursor = self.head[nz * self.nx + nx];
                while cursor != EMPTY {
                    if pred(cursor) {
                        return true;
                    }
                    cursor = self.next[cursor as usize];
                }
            }
        }
        false
    }
}

/// Rejection-samples up to `cfg.target_count` spheres resting on the ground
/// plane with no two footprints intersecting. Stops at the first sphere that
/// exhausts its attempts; the shortfall is logged, not returned as an error.
pub fn generate_spheres(cfg: &SceneConfig, area: &SpawnArea) -> Placement {
    let requested = cfg.target_count;
    if requested == 0 {
        return Placement::default();
    }

    let (min_radius, max_radius) = cfg.sanitized_radii();
    let radius_span = max_radius - min_radius;

    let mut rng = WangRng::new(cfg.seed);
    let mut grid = PlacementGrid::new(area, 2.0 * max_radius, requested as usize);
    let mut spheres: Vec<Sphere> = Vec::with_capacity(requested as usize);
    let mut attempts = 0u64;

    for i in 0..requested {
        let mut placed = false;

        for _ in 0..MAX_PLACEMENT_ATTEMPTS {
            attempts += 1;

            let radius = if radius_span > 0.0 {
                rng.range(min_radius, max_radius).max(min_radius)
            } else {
                max_radius
            };

            let (lo_x, hi_x) = (area.min_x + radius, area.max_x - radius);
            let (lo_z, hi_z) = (area.min_z + radius, area.max_z - radius);
            if hi_x <= lo_x || hi_z <= lo_z {
                continue;
            }

            let x = rng.range(lo_x, hi_x);
            let z = rng.range(lo_z, hi_z);

            let overlaps = grid.any_near(x, z, |j| {
                let other = &spheres[j as usize];
                let dx = x - other.center.x;
                let dz = z - other.center.z;
                let min_dist = radius + other.radius;
                dx * dx + dz * dz < min_dist * min_dist
            });
            if overlaps {
                continue;
            }

            let hue = rng.next_f32();
            let saturation = rng.range(0.65, 0.9);
            let value = rng.range(0.4, 0.8);

            grid.insert(i, x, z);
            spheres.push(Sphere {
                center: Vec3::new(x, area.ground_y + radius, z),
                radius,
                albedo: hsv_to_rgb(hue, saturation, value),
            });
            placed = true;
            break;
        }

        if !placed {
            log::warn!(
                "Unable to place sphere {} without overlap after {} attempts",
                i,
                MAX_PLACEMENT_ATTEMPTS
            );
            break;
        }
    }

    if (spheres.len() as u32) < requested {
        log::warn!(
            "Placed {} spheres out of {} requested",
            spheres.len(),
            requested
        );
    }

    Placement {
        spheres,
        requested,
        attempts,
    }
}

pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Vec3 {
    let h6 = (h.rem_euclid(1.0)) * 6.0;
    let sector = h6.floor();
    let f = h6 - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    match sector as u32 % 6 {
        0 => Vec3::new(v, t, p),
        1 => Vec3::new(q, v, p),
        2 => Vec3::new(p, v, t),
        3 => Vec3::new(p, q, v),
        4 => Vec3::new(t, p, v),
        _ => Vec3::new(v, p, q),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene(target_count: u32, min_radius: f32, max_radius: f32) -> SceneConfig {
        SceneConfig {
            target_count,
            min_radius,
            max_radius,
            density: None,
            seed: 0x1234_5678,
        }
    }

    #[test]
    fn test_spawn_area_matches_density() {
        let cfg = SceneConfig {
            density: Some(1.0),
            ..scene(400, 0.2, 0.4)
        };
        let area = SpawnArea::compute(&cfg);
        assert!((area.width() - 20.0).abs() < 1e-4);
        assert!((area.depth() - 20.0).abs() < 1e-4);
        assert_eq!(area.min_x, -area.max_x);
        assert_eq!(area.ground_y, GROUND_Y);
    }

    #[test]
    fn test_spawn_area_default_density_and_minimum_count() {
        // 16 spheres minimum, one per (3 * 0.5)^2
        let area = SpawnArea::compute(&scene(1, 0.1, 0.5));
        assert!((area.width() - 6.0).abs() < 1e-4);

        // non-positive radius falls back to 0.25
        let fallback = SpawnArea::compute(&scene(16, 0.0, 0.0));
        assert!((fallback.width() - 3.0).abs() < 1e-4);
    }

    #[test]
    fn test_no_overlap() {
        let cfg = scene(2000, 0.15, 0.45);
        let area = SpawnArea::compute(&cfg);
        let placement = generate_spheres(&cfg, &area);
        assert!(!placement.spheres.is_empty());

        let spheres = &placement.spheres;
        for (i, a) in spheres.iter().enumerate() {
            for b in &spheres[i + 1..] {
                let dist = a.center.distance(b.center);
                assert!(
                    dist + 1e-4 >= a.radius + b.radius,
                    "{a:?} overlaps {b:?}"
                );
            }
        }
    }

    #[test]
    fn test_spheres_rest_inside_footprint() {
        let cfg = scene(500, 0.2, 0.6);
        let area = SpawnArea::compute(&cfg);
        for s in generate_spheres(&cfg, &area).spheres {
            assert!((s.center.y - (area.ground_y + s.radius)).abs() < 1e-6);
            assert!(s.radius >= 0.2 && s.radius <= 0.6);
            assert!(s.center.x - s.radius >= area.min_x - 1e-4);
            assert!(s.center.x + s.radius <= area.max_x + 1e-4);
            assert!(s.center.z - s.radius >= area.min_z - 1e-4);
            assert!(s.center.z + s.radius <= area.max_z + 1e-4);
            assert!(s.albedo.min_element() >= 0.0 && s.albedo.max_element() <= 1.0);
        }
    }

    #[test]
    fn test_same_seed_same_scene() {
        let cfg = scene(300, 0.15, 0.45);
        let area = SpawnArea::compute(&cfg);
        let a = generate_spheres(&cfg, &area);
        let b = generate_spheres(&cfg, &area);
        assert_eq!(a.spheres, b.spheres);
        assert_eq!(a.attempts, b.attempts);
    }

    #[test]
    fn test_zero_target_places_nothing() {
        let cfg = scene(0, 0.15, 0.45);
        let area = SpawnArea::compute(&cfg);
        let placement = generate_spheres(&cfg, &area);
        assert!(placement.spheres.is_empty());
        assert_eq!(placement.attempts, 0);
        assert!(placement.is_complete());
    }

    #[test]
    fn test_dense_pack_stops_short() {
        let cfg = SceneConfig {
            density: Some(1.0),
            ..scene(10_000, 1.0, 1.0)
        };
        let area = SpawnArea::compute(&cfg);
        let placement = generate_spheres(&cfg, &area);

        assert!(placement.spheres.len() < 10_000);
        assert!(!placement.is_complete());
        assert!(placement.attempts <= 10_000 * MAX_PLACEMENT_ATTEMPTS as u64);
    }

    #[test]
    fn test_placement_grid_finds_neighbours_only() {
        let area = SpawnArea {
            min_x: 0.0,
            max_x: 10.0,
            min_z: 0.0,
            max_z: 10.0,
            ground_y: 0.0,
        };
        let mut grid = PlacementGrid::new(&area, 1.0, 3);
        grid.insert(0, 0.5, 0.5);
        grid.insert(1, 1.5, 1.5);
        grid.insert(2, 8.5, 8.5);

        let mut seen = Vec::new();
        grid.any_near(1.2, 1.2, |i| {
            seen.push(i);
            false
        });
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1]);
        assert!(grid.any_near(9.9, 9.9, |i| i == 2));
        assert!(!grid.any_near(5.0, 5.0, |_| true));
    }

    #[test]
    fn test_placement_grid_sees_neighbour_across_uneven_cells() {
        // 10 / 3 is not whole, so cells must widen rather than shrink
        let area = SpawnArea {
            min_x: 0.0,
            max_x: 10.0,
            min_z: 0.0,
            max_z: 10.0,
            ground_y: 0.0,
        };
        let mut grid = PlacementGrid::new(&area, 3.0, 1);
        grid.insert(0, 2.4, 5.0);
        assert!(grid.any_near(5.1, 5.0, |i| i == 0));
    }

    #[test]
    fn test_no_overlap_across_seeds_with_uneven_cells() {
        for seed in 0..200 {
            let cfg = SceneConfig {
                seed,
                density: Some(0.6),
                ..scene(60, 1.5, 1.5)
            };
            let area = SpawnArea::compute(&cfg);
            let spheres = generate_spheres(&cfg, &area).spheres;
            for (i, a) in spheres.iter().enumerate() {
                for b in &spheres[i + 1..] {
                    assert!(
                        a.center.distance(b.center) + 1e-4 >= a.radius + b.radius,
                        "seed {seed}: {a:?} overlaps {b:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_hsv_primaries() {
        assert!((hsv_to_rgb(0.0, 1.0, 1.0) - Vec3::X).length() < 1e-6);
        assert!((hsv_to_rgb(1.0 / 3.0, 1.0, 1.0) - Vec3::Y).length() < 1e-5);
        assert!((hsv_to_rgb(2.0 / 3.0, 1.0, 1.0) - Vec3::Z).length() < 1e-5);
        assert_eq!(hsv_to_rgb(0.5, 0.0, 0.5), Vec3::splat(0.5));
    }
}
