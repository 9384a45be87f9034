//! Connected-component patch delineation.
//!
//! Two-pass labelling over a row-major window: the first pass assigns
//! provisional labels from the already-visited neighbours (W, N and, for
//! 8-connectivity, NW and NE) and records equivalences in a disjoint-set
//! forest; the second pass resolves every cell to a compact patch id in order
//! of first appearance, so labelling is deterministic.

use crate::config::Connectivity;
use crate::raster::{CellClass, ClassifiedRaster};

/// A maximal connected set of same-class cells within one window.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub id: usize,
    pub class: CellClass,
    /// Window-local row-major indices of member cells.
    pub cells: Vec<usize>,
    /// Area in m².
    pub area: f64,
    /// Perimeter in m: cell edges facing another class, no-data or the window edge.
    pub perimeter: f64,
    /// Centroid in cell units `(row, col)`, measured to cell centres.
    pub centroid: (f64, f64),
}

impl Patch {
    #[inline]
    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }
}

/// All patches of a window together with the per-cell patch labels.
#[derive(Debug, Clone)]
pub struct PatchSet {
    pub patches: Vec<Patch>,
    /// Patch id per cell; `None` for no-data cells.
    pub labels: Vec<Option<usize>>,
    pub width: usize,
    pub height: usize,
    pub cell_size: f64,
    pub connectivity: Connectivity,
}

impl PatchSet {
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    /// Patches belonging to `class`.
    pub fn of_class(&self, class: CellClass) -> impl Iterator<Item = &Patch> {
        self.patches.iter().filter(move |p| p.class == class)
    }
}

struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new() -> Self {
        Self { parent: Vec::new(), rank: Vec::new() }
    }

    fn make(&mut self) -> usize {
        let id = self.parent.len();
        self.parent.push(id);
        self.rank.push(0);
        id
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

/// Label the patches of `window` under the given connectivity.
///
/// A window without valid cells yields an empty `PatchSet`, not an error.
pub fn delineate(window: &ClassifiedRaster, connectivity: Connectivity) -> PatchSet {
    let (w, h) = (window.width, window.height);
    let mut provisional: Vec<Option<usize>> = vec![None; w * h];
    let mut sets = DisjointSet::new();

    let back_neighbours: &[(isize, isize)] = match connectivity {
        Connectivity::Four => &[(0, -1), (-1, 0)],
        Connectivity::Eight => &[(0, -1), (-1, -1), (-1, 0), (-1, 1)],
    };

    // ── Pass 1: provisional labels + equivalences ──────────────────────────
    for r in 0..h {
        for c in 0..w {
            let Some(class) = window.get(r, c) else { continue };
            let mut label: Option<usize> = None;
            for &(dr, dc) in back_neighbours {
                let (nr, nc) = (r as isize + dr, c as isize + dc);
                if nr < 0 || nc < 0 || nc >= w as isize {
                    continue;
                }
                let (nr, nc) = (nr as usize, nc as usize);
                if window.get(nr, nc) != Some(class) {
                    continue;
                }
                if let Some(nl) = provisional[nr * w + nc] {
                    match label {
                        None => label = Some(nl),
                        Some(l) => sets.union(l, nl),
                    }
                }
            }
            provisional[r * w + c] = Some(label.unwrap_or_else(|| sets.make()));
        }
    }

    // ── Pass 2: resolve to compact ids ─────────────────────────────────────
    let mut root_to_id: Vec<Option<usize>> = vec![None; sets.parent.len()];
    let mut labels: Vec<Option<usize>> = vec![None; w * h];
    let mut members: Vec<Vec<usize>> = Vec::new();
    let mut classes: Vec<CellClass> = Vec::new();

    for idx in 0..w * h {
        let (Some(p), Some(class)) = (provisional[idx], window.cells[idx]) else { continue };
        let root = sets.find(p);
        let id = match root_to_id[root] {
            Some(id) => id,
            None => {
                let id = members.len();
                root_to_id[root] = Some(id);
                members.push(Vec::new());
                classes.push(class);
                id
            }
        };
        labels[idx] = Some(id);
        members[id].push(idx);
    }

    let cell_size = window.cell_size();
    let cell_area = window.cell_area();
    let patches = members
        .into_iter()
        .zip(classes)
        .enumerate()
        .map(|(id, (cells, class))| {
            let perimeter_edges = cells
                .iter()
                .map(|&idx| exposed_edges(window, idx / w, idx % w, class))
                .sum::<usize>();
            let n = cells.len() as f64;
            let (sum_r, sum_c) = cells.iter().fold((0.0, 0.0), |(sr, sc), &idx| {
                (sr + (idx / w) as f64 + 0.5, sc + (idx % w) as f64 + 0.5)
            });
            Patch {
                id,
                class,
                area: n * cell_area,
                perimeter: perimeter_edges as f64 * cell_size,
                centroid: (sum_r / n, sum_c / n),
                cells,
            }
        })
        .collect();

    PatchSet {
        patches,
        labels,
        width: w,
        height: h,
        cell_size,
        connectivity,
    }
}

/// Number of the four sides of `(r, c)` that border something other than `class`.
fn exposed_edges(window: &ClassifiedRaster, r: usize, c: usize, class: CellClass) -> usize {
    let mut edges = 0;
    for (dr, dc) in [(-1isize, 0isize), (1, 0), (0, -1), (0, 1)] {
        let (nr, nc) = (r as isize + dr, c as isize + dc);
        let inside = nr >= 0 && nc >= 0 && (nr as usize) < window.height && (nc as usize) < window.width;
        if !inside || window.get(nr as usize, nc as usize) != Some(class) {
            edges += 1;
        }
    }
    edges
}
