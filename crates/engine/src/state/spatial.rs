use dashmap::DashMap;

/// 派遣单坐标的网格索引
///
/// 坐标按固定边长划入网格，半径查询只检查覆盖范围内的格子。
#[derive(Debug)]
pub struct SpatialIndex {
    cell_size: f64,
    cells: DashMap<(i64, i64), Vec<u64>>,
    points: DashMap<u64, (f64, f64)>,
}

impl SpatialIndex {
    pub const DEFAULT_CELL_SIZE: f64 = 100.0;

    pub fn new(cell_size: f64) -> Self {
        let cell_size = if cell_size.is_finite() && cell_size > 0.0 {
            cell_size
        } else {
            Self::DEFAULT_CELL_SIZE
        };
        Self {
            cell_size,
            cells: DashMap::new(),
            points: DashMap::new(),
        }
    }

    fn cell_of(&self, x: f64, y: f64) -> (i64, i64) {
        (
            (x / self.cell_size).floor() as i64,
            (y / self.cell_size).floor() as i64,
        )
    }

    /// 插入或移动一个点
    pub fn insert(&self, id: u64, x: f64, y: f64) {
        if let Some((old_x, old_y)) = self.points.insert(id, (x, y)) {
            if (old_x, old_y) == (x, y) {
                return;
            }
            self.remove_from_cell(id, self.cell_of(old_x, old_y));
        }
        self.cells.entry(self.cell_of(x, y)).or_default().push(id);
    }

    pub fn remove(&self, id: u64) -> bool {
        match self.points.remove(&id) {
            Some((_, (x, y))) => {
                self.remove_from_cell(id, self.cell_of(x, y));
                true
            }
            None => false,
        }
    }

    fn remove_from_cell(&self, id: u64, cell: (i64, i64)) {
        let now_empty = match self.cells.get_mut(&cell) {
            Some(mut ids) => {
                ids.retain(|existing| *existing != id);
                ids.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.cells.remove_if(&cell, |_, ids| ids.is_empty());
        }
    }

    pub fn contains(&self, id: u64) -> bool {
        self.points.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&self) {
        self.cells.clear();
        self.points.clear();
    }

    /// 半径范围内的全部点，按距离从近到远
    pub fn within(&self, x: f64, y: f64, radius: f64) -> Vec<(u64, f64)> {
        if !radius.is_finite() || radius < 0.0 {
            return Vec::new();
        }

        let (min_cx, min_cy) = self.cell_of(x - radius, y - radius);
        let (max_cx, max_cy) = self.cell_of(x + radius, y + radius);

        let mut candidates = Vec::new();
        for cx in min_cx..=max_cx {
            for cy in min_cy..=max_cy {
                if let Some(ids) = self.cells.get(&(cx, cy)) {
                    candidates.extend(ids.iter().copied());
                }
            }
        }

        let mut found: Vec<(u64, f64)> = candidates
            .into_iter()
            .filter_map(|id| {
                let (px, py) = *self.points.get(&id)?;
                let distance = ((px - x).powi(2) + (py - y).powi(2)).sqrt();
                (distance <= radius).then_some((id, distance))
            })
            .collect();
        found.sort_by(|a, b| a.1.total_cmp(&b.1));
        found
    }

    /// 半径范围内是否存在满足条件的点
    pub fn has_within<F>(&self, x: f64, y: f64, radius: f64, predicate: F) -> bool
    where
        F: Fn(u64) -> bool,
    {
        self.within(x, y, radius)
            .into_iter()
            .any(|(id, _)| predicate(id))
    }
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CELL_SIZE)
    }
}
