//! Top-level branch grid and its rank ownership map.
//!
//! Branches are the cells of a uniform grid over the domain bounds. The
//! outermost cells extend to infinity, so every position falls into
//! exactly one branch and searches near the boundary stay exact.

use sphex_core::{BranchId, Rank};

use crate::error::SpaceError;

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    /// Minimum corner.
    pub min: [f64; 3],
    /// Maximum corner.
    pub max: [f64; 3],
}

impl Aabb {
    /// Box spanning `min..max`.
    pub fn new(min: [f64; 3], max: [f64; 3]) -> Self {
        Self { min, max }
    }

    /// The unit cube `[0, 1]^3`.
    pub fn unit() -> Self {
        Self::new([0.0; 3], [1.0; 3])
    }

    /// Edge lengths.
    pub fn extent(&self) -> [f64; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    /// Whether `p` lies inside (inclusive).
    pub fn contains(&self, p: [f64; 3]) -> bool {
        (0..3).all(|k| self.min[k] <= p[k] && p[k] <= self.max[k])
    }

    /// Squared distance from `p` to the box (zero inside).
    pub fn distance2(&self, p: [f64; 3]) -> f64 {
        (0..3)
            .map(|k| {
                let d = (self.min[k] - p[k]).max(p[k] - self.max[k]).max(0.0);
                d * d
            })
            .sum()
    }

    /// Whether any point strictly inside the sphere lies in the box.
    pub fn intersects_sphere(&self, center: [f64; 3], radius: f64) -> bool {
        self.distance2(center) < radius * radius
    }

    fn validate(&self) -> Result<(), SpaceError> {
        for k in 0..3 {
            if !self.min[k].is_finite() || !self.max[k].is_finite() {
                return Err(SpaceError::InvalidBounds {
                    reason: format!("axis {k} is not finite"),
                });
            }
            if self.min[k] >= self.max[k] {
                return Err(SpaceError::InvalidBounds {
                    reason: format!("axis {k}: min {} >= max {}", self.min[k], self.max[k]),
                });
            }
        }
        Ok(())
    }
}

/// Uniform grid of top-level branches with an owner rank per branch.
#[derive(Clone, Debug)]
pub struct DomainGrid {
    bounds: Aabb,
    cells: [u32; 3],
    cell_size: [f64; 3],
    owners: Vec<Rank>,
}

impl DomainGrid {
    /// Grid of `cells` branches over `bounds`, with `owners[b]` owning
    /// branch `b` (x fastest, then y, then z).
    pub fn new(bounds: Aabb, cells: [u32; 3], owners: Vec<Rank>) -> Result<Self, SpaceError> {
        bounds.validate()?;
        if cells.contains(&0) {
            return Err(SpaceError::EmptyGrid);
        }
        let branches = cells.iter().map(|&c| c as usize).product::<usize>();
        if owners.len() != branches {
            return Err(SpaceError::OwnerCountMismatch {
                branches,
                owners: owners.len(),
            });
        }
        let extent = bounds.extent();
        let cell_size = [
            extent[0] / f64::from(cells[0]),
            extent[1] / f64::from(cells[1]),
            extent[2] / f64::from(cells[2]),
        ];
        Ok(Self {
            bounds,
            cells,
            cell_size,
            owners,
        })
    }

    /// Split the grid into `ranks` contiguous slabs along x.
    pub fn slabs(bounds: Aabb, cells: [u32; 3], ranks: usize) -> Result<Self, SpaceError> {
        if cells.contains(&0) {
            return Err(SpaceError::EmptyGrid);
        }
        let nx = cells[0] as usize;
        if ranks == 0 || ranks > nx {
            return Err(SpaceError::TooManyRanks { ranks, slabs: nx });
        }
        let mut owners = Vec::with_capacity(nx * cells[1] as usize * cells[2] as usize);
        for _z in 0..cells[2] {
            for _y in 0..cells[1] {
                for x in 0..nx {
                    let owner = x * ranks / nx;
                    owners.push(Rank(owner as u32));
                }
            }
        }
        Self::new(bounds, cells, owners)
    }

    /// Domain bounds.
    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }

    /// Branches per axis.
    pub fn cells(&self) -> [u32; 3] {
        self.cells
    }

    /// Total number of branches.
    pub fn branch_count(&self) -> usize {
        self.owners.len()
    }

    /// Owner of `branch`.
    pub fn owner(&self, branch: BranchId) -> Rank {
        self.owners[branch.0 as usize]
    }

    /// Branches owned by `rank`.
    pub fn owned_by(&self, rank: Rank) -> impl Iterator<Item = BranchId> + '_ {
        self.owners
            .iter()
            .enumerate()
            .filter(move |&(_, o)| *o == rank)
            .map(|(b, _)| BranchId(b as u32))
    }

    /// Branch containing `pos`.
    pub fn branch_of(&self, pos: [f64; 3]) -> BranchId {
        self.branch_at(self.cell_coord(pos))
    }

    /// Rank owning the branch containing `pos`.
    pub fn owner_of(&self, pos: [f64; 3]) -> Rank {
        self.owner(self.branch_of(pos))
    }

    /// Region covered by `branch`. Boundary cells are unbounded
    /// outward.
    pub fn branch_bounds(&self, branch: BranchId) -> Aabb {
        let b = branch.0;
        let c = [
            b % self.cells[0],
            (b / self.cells[0]) % self.cells[1],
            b / (self.cells[0] * self.cells[1]),
        ];
        let mut min = [0.0; 3];
        let mut max = [0.0; 3];
        for k in 0..3 {
            min[k] = if c[k] == 0 {
                f64::NEG_INFINITY
            } else {
                self.bounds.min[k] + f64::from(c[k]) * self.cell_size[k]
            };
            max[k] = if c[k] + 1 == self.cells[k] {
                f64::INFINITY
            } else {
                self.bounds.min[k] + f64::from(c[k] + 1) * self.cell_size[k]
            };
        }
        Aabb::new(min, max)
    }

    /// Every branch with points strictly inside the sphere.
    pub fn branches_within(&self, center: [f64; 3], radius: f64) -> Vec<BranchId> {
        let lo = self.cell_coord([center[0] - radius, center[1] - radius, center[2] - radius]);
        let hi = self.cell_coord([center[0] + radius, center[1] + radius, center[2] + radius]);
        let mut out = Vec::new();
        for z in lo[2]..=hi[2] {
            for y in lo[1]..=hi[1] {
                for x in lo[0]..=hi[0] {
                    let branch = self.branch_at([x, y, z]);
                    if self.branch_bounds(branch).intersects_sphere(center, radius) {
                        out.push(branch);
                    }
                }
            }
        }
        out
    }

    fn cell_coord(&self, pos: [f64; 3]) -> [u32; 3] {
        let mut c = [0u32; 3];
        for k in 0..3 {
            let f = ((pos[k] - self.bounds.min[k]) / self.cell_size[k]).floor();
            // Saturating cast: negative and NaN map to 0.
            c[k] = (f.max(0.0) as u32).min(self.cells[k] - 1);
        }
        c
    }

    fn branch_at(&self, c: [u32; 3]) -> BranchId {
        BranchId(c[0] + self.cells[0] * (c[1] + self.cells[1] * c[2]))
    }
}
