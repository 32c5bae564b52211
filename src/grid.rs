use bytemuck::{Pod, Zeroable};
use glam::{UVec3, Vec3};

use crate::config::{COARSE_FACTOR, MAX_SPHERES};
use crate::scene::{SpawnArea, Sphere};

pub const MIN_CELL_SIZE: f32 = 0.05;
pub const CELL_SIZE_PER_RADIUS: f32 = 2.5;
/// Fine cells per horizontal axis are capped; the cell grows past
/// `2.5 * max_radius` only when a huge sparse footprint would exceed this.
pub const MAX_GRID_DIM: u32 = 1024;

/// A cell is wider than any sphere's diameter, so a sphere's AABB touches at
/// most two cells per horizontal axis.
pub const MAX_REFS_PER_SPHERE: usize = 4;
pub const MAX_CELLS: usize = (MAX_GRID_DIM * MAX_GRID_DIM) as usize;
pub const MAX_COARSE_CELLS: usize = MAX_CELLS.div_ceil((COARSE_FACTOR * COARSE_FACTOR) as usize);
pub const MAX_REFERENCES: usize = MAX_SPHERES as usize * MAX_REFS_PER_SPHERE;

/// Grid layout as the ray-trace kernel sees it.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Default, Debug, PartialEq)]
pub struct GridParams {
    pub min: [f32; 3],
    pub inv_cell: f32,
    pub dims: [u32; 3],
    pub coarse_factor: u32,
}

/// Inclusive cell-index bounds of one sphere's clipped AABB.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellRange {
    pub min: UVec3,
    pub max: UVec3,
}

impl CellRange {
    pub fn cells(&self) -> impl Iterator<Item = UVec3> + '_ {
        (self.min.z..=self.max.z).flat_map(move |z| {
            (self.min.y..=self.max.y)
                .flat_map(move |y| (self.min.x..=self.max.x).map(move |x| UVec3::new(x, y, z)))
        })
    }

    pub fn contains(&self, cell: UVec3) -> bool {
        cell.cmpge(self.min).all() && cell.cmple(self.max).all()
    }
}

/// Two-level uniform grid: fine cells carrying `(start, count)` into
/// `indices`, plus per-coarse-cell reference totals for early-out.
#[derive(Clone, Debug)]
pub struct UniformGrid {
    pub min: Vec3,
    pub cell: f32,
    pub inv_cell: f32,
    pub dims: UVec3,
    pub coarse_factor: u32,
    pub coarse_dims: UVec3,
    /// `[start, count]` per fine cell.
    pub ranges: Vec<[u32; 2]>,
    pub indices: Vec<u32>,
    pub coarse_counts: Vec<u32>,
}

impl UniformGrid {
    /// Counting-sort build: count per cell, exclusive prefix into starts,
    /// scatter sphere indices, then fold fine counts into coarse cells.
    pub fn build(spheres: &[Sphere], area: &SpawnArea, coarse_factor: u32) -> Self {
        assert!(coarse_factor > 0, "coarse factor must be non-zero");

        let max_radius = spheres.iter().map(|s| s.radius).fold(0.0f32, f32::max);
        let extent = area.width().max(area.depth());
        let cell = (CELL_SIZE_PER_RADIUS * max_radius)
            .max(MIN_CELL_SIZE)
            .max(extent / MAX_GRID_DIM as f32);
        let min = Vec3::new(area.min_x, area.ground_y, area.min_z);

        let dims = if spheres.is_empty() {
            UVec3::ONE
        } else {
            let along = |e: f32| ((e / cell).ceil() as u32).clamp(1, MAX_GRID_DIM);
            UVec3::new(along(area.width()), 1, along(area.depth()))
        };
        let coarse_dims = (dims + UVec3::splat(coarse_factor - 1)) / coarse_factor;

        let mut grid = UniformGrid {
            min,
            cell,
            inv_cell: 1.0 / cell,
            dims,
            coarse_factor,
            coarse_dims,
            ranges: vec![[0, 0]; (dims.x * dims.y * dims.z) as usize],
            indices: Vec::new(),
            coarse_counts: vec![0; (coarse_dims.x * coarse_dims.y * coarse_dims.z) as usize],
        };
        if spheres.is_empty() {
            return grid;
        }

        // count
        for sphere in spheres {
            for c in grid.cell_range(sphere).cells() {
                let idx = grid.cell_index(c);
                grid.ranges[idx][1] += 1;
            }
        }

        // exclusive prefix
        let mut total = 0u32;
        for range in grid.ranges.iter_mut() {
            range[0] = total;
            total += range[1];
        }

        // scatter
        grid.indices = vec![0; total as usize];
        let mut cursor: Vec<u32> = grid.ranges.iter().map(|r| r[0]).collect();
        for (i, sphere) in spheres.iter().enumerate() {
            for c in grid.cell_range(sphere).cells() {
                let slot = &mut cursor[grid.cell_index(c)];
                grid.indices[*slot as usize] = i as u32;
                *slot += 1;
            }
        }

        // coarse
        for z in 0..dims.z {
            for y in 0..dims.y {
                for x in 0..dims.x {
                    let fine = UVec3::new(x, y, z);
                    let count = grid.ranges[grid.cell_index(fine)][1];
                    let coarse = grid.coarse_index(fine);
                    grid.coarse_counts[coarse] += count;
                }
            }
        }

        grid
    }

    pub fn cell_index(&self, c: UVec3) -> usize {
        debug_assert!(c.cmplt(self.dims).all(), "cell {c} outside {}", self.dims);
        (c.x + self.dims.x * (c.y + self.dims.y * c.z)) as usize
    }

    /// Index of the coarse cell owning fine cell `c`.
    pub fn coarse_index(&self, c: UVec3) -> usize {
        let g = c / self.coarse_factor;
        (g.x + self.coarse_dims.x * (g.y + self.coarse_dims.y * g.z)) as usize
    }

    /// Fine cells overlapped by the sphere's AABB, clamped to the grid.
    pub fn cell_range(&self, sphere: &Sphere) -> CellRange {
        let r = Vec3::splat(sphere.radius);
        let to_cell = |p: Vec3| {
            let rel = ((p - self.min) * self.inv_cell).floor();
            let hi = (self.dims - UVec3::ONE).as_vec3();
            rel.clamp(Vec3::ZERO, hi).as_uvec3()
        };
        CellRange {
            min: to_cell(sphere.center - r),
            max: to_cell(sphere.center + r),
        }
    }

    pub fn cell_count(&self) -> usize {
        self.ranges.len()
    }

    pub fn reference_count(&self) -> usize {
        self.indices.len()
    }

    /// Sphere indices stored under fine cell `c`.
    pub fn cell_indices(&self, c: UVec3) -> &[u32] {
        let [start, count] = self.ranges[self.cell_index(c)];
        &self.indices[start as usize..(start + count) as usize]
    }

    pub fn params(&self) -> GridParams {
        GridParams {
            min: self.min.to_array(),
            inv_cell: self.inv_cell,
            dims: self.dims.to_array(),
            coarse_factor: self.coarse_factor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SceneConfig;
    use crate::scene::generate_spheres;

    fn build_scene(count: u32) -> (Vec<Sphere>, UniformGrid) {
        let cfg = SceneConfig {
            target_count: count,
            min_radius: 0.15,
            max_radius: 0.45,
            density: None,
            seed: 99,
        };
        let area = SpawnArea::compute(&cfg);
        let spheres = generate_spheres(&cfg, &area).spheres;
        let grid = UniformGrid::build(&spheres, &area, COARSE_FACTOR);
        (spheres, grid)
    }

    fn all_cells(grid: &UniformGrid) -> Vec<UVec3> {
        let everything = CellRange {
            min: UVec3::ZERO,
            max: grid.dims - UVec3::ONE,
        };
        everything.cells().collect()
    }

    #[test]
    fn test_cell_size_follows_max_radius() {
        let (spheres, grid) = build_scene(256);
        let max_r = spheres.iter().map(|s| s.radius).fold(0.0f32, f32::max);
        assert!((grid.cell - 2.5 * max_r).abs() < 1e-6);
        assert_eq!(grid.dims.y, 1);
    }

    #[test]
    fn test_grid_coverage() {
        let (spheres, grid) = build_scene(800);
        for c in all_cells(&grid) {
            let stored = grid.cell_indices(c);
            for (i, sphere) in spheres.iter().enumerate() {
                let expected = grid.cell_range(sphere).contains(c);
                let present = stored.iter().filter(|&&s| s == i as u32).count();
                assert_eq!(present, expected as usize, "sphere {i} in cell {c}");
            }
        }
    }

    #[test]
    fn test_prefix_consistency() {
        let (_, grid) = build_scene(1000);
        for pair in grid.ranges.windows(2) {
            assert_eq!(pair[1][0], pair[0][0] + pair[0][1]);
        }
        let total: u32 = grid.ranges.iter().map(|r| r[1]).sum();
        assert_eq!(total as usize, grid.indices.len());
    }

    #[test]
    fn test_indices_ascending_within_cell() {
        let (_, grid) = build_scene(600);
        for c in all_cells(&grid) {
            assert!(grid.cell_indices(c).windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_coarse_aggregation() {
        let (_, grid) = build_scene(1000);
        let mut expected = vec![0u32; grid.coarse_counts.len()];
        for c in all_cells(&grid) {
            let g = c / COARSE_FACTOR;
            let idx = (g.x + grid.coarse_dims.x * (g.y + grid.coarse_dims.y * g.z)) as usize;
            expected[idx] += grid.ranges[grid.cell_index(c)][1];
        }
        assert_eq!(grid.coarse_counts, expected);
        assert_eq!(
            grid.coarse_counts.iter().sum::<u32>() as usize,
            grid.reference_count()
        );
    }

    #[test]
    fn test_zero_spheres() {
        let (spheres, grid) = build_scene(0);
        assert!(spheres.is_empty());
        assert_eq!(grid.dims, UVec3::ONE);
        assert_eq!(grid.coarse_dims, UVec3::ONE);
        assert_eq!(grid.coarse_factor, COARSE_FACTOR);
        assert!(grid.indices.is_empty());
        assert_eq!(grid.ranges, vec![[0, 0]]);
        assert_eq!(grid.coarse_counts, vec![0]);
    }

    #[test]
    fn test_sphere_spanning_cells_is_duplicated() {
        let area = SpawnArea {
            min_x: 0.0,
            max_x: 10.0,
            min_z: 0.0,
            max_z: 10.0,
            ground_y: 0.0,
        };
        // cell = 2.5, sphere at a cell corner touches four cells
        let spheres = [Sphere {
            center: Vec3::new(5.0, 1.0, 5.0),
            radius: 1.0,
            albedo: Vec3::ONE,
        }];
        let grid = UniformGrid::build(&spheres, &area, COARSE_FACTOR);
        assert_eq!(grid.dims, UVec3::new(4, 1, 4));
        let range = grid.cell_range(&spheres[0]);
        assert_eq!(range.min, UVec3::new(1, 0, 1));
        assert_eq!(range.max, UVec3::new(2, 0, 2));
        assert_eq!(grid.reference_count(), 4);
        assert_eq!(grid.coarse_counts, vec![4]);
    }

    #[test]
    fn test_references_fit_gpu_capacity() {
        let (spheres, grid) = build_scene(2000);
        for sphere in &spheres {
            assert!(grid.cell_range(sphere).cells().count() <= MAX_REFS_PER_SPHERE);
        }
        assert!(grid.reference_count() <= spheres.len() * MAX_REFS_PER_SPHERE);
        assert!(grid.cell_count() <= MAX_CELLS);
        assert!(grid.coarse_counts.len() <= MAX_COARSE_CELLS);
    }

    #[test]
    fn test_params_mirror_grid() {
        let (_, grid) = build_scene(64);
        let p = grid.params();
        assert_eq!(p.dims, grid.dims.to_array());
        assert_eq!(p.coarse_factor, COARSE_FACTOR);
        assert_eq!(std::mem::size_of::<GridParams>(), 32);
    }
}
