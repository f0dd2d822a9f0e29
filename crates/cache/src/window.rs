//! Distance ordering and the hot window.

/// Every index in `0..len`, nearest to `cursor` first. Equal distances
/// put the lower index first, so the order around 2 is `2, 1, 3, 0, 4`.
pub fn nearest_first(cursor: usize, len: usize) -> Vec<usize> {
    if len == 0 {
        return Vec::new();
    }
    let cursor = cursor.min(len - 1);
    let mut order = Vec::with_capacity(len);
    order.push(cursor);
    let mut distance = 1;
    while order.len() < len {
        if let Some(before) = cursor.checked_sub(distance) {
            order.push(before);
        }
        if cursor + distance < len {
            order.push(cursor + distance);
        }
        distance += 1;
    }
    order
}

/// Indices allowed to hold a decoded full image.
///
/// The window is the first `min(2 * radius + 1, len)` entries of
/// [`nearest_first`]. Near either end of the sequence it extends further
/// into the other direction rather than shrinking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheWindow {
    cursor: Option<usize>,
    indices: Vec<usize>,
}

impl CacheWindow {
    /// Window around `cursor`. At either end it extends inward instead of
    /// shrinking, so it always holds `min(2 * radius + 1, len)` indices.
    pub fn compute(cursor: usize, len: usize, radius: usize) -> Self {
        if len == 0 {
            return Self::default();
        }
        let size = radius.saturating_mul(2).saturating_add(1);
        let mut indices = nearest_first(cursor, len);
        indices.truncate(size);
        Self {
            cursor: Some(cursor.min(len - 1)),
            indices,
        }
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Window members, nearest to the cursor first.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn contains(&self, index: usize) -> bool {
        self.indices.contains(&index)
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Indices in `self` that `next` no longer holds, ascending.
    pub fn departed(&self, next: &CacheWindow) -> Vec<usize> {
        let mut gone: Vec<usize> = self
            .indices
            .iter()
            .copied()
            .filter(|index| !next.contains(*index))
            .collect();
        gone.sort_unstable();
        gone
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_first_order() {
        assert_eq!(nearest_first(2, 5), vec![2, 1, 3, 0, 4]);
        assert_eq!(nearest_first(0, 4), vec![0, 1, 2, 3]);
        assert_eq!(nearest_first(3, 4), vec![3, 2, 1, 0]);
        assert_eq!(nearest_first(9, 3), vec![2, 1, 0]);
        assert!(nearest_first(0, 0).is_empty());
    }

    #[test]
    fn test_window_around_middle() {
        let window = CacheWindow::compute(2, 5, 1);
        assert_eq!(window.indices(), &[2, 1, 3]);
        assert!(window.contains(1) && window.contains(3));
        assert!(!window.contains(0));
    }

    #[test]
    fn test_window_at_edges_and_small_sequences() {
        assert_eq!(CacheWindow::compute(0, 5, 1).indices(), &[0, 1, 2]);
        assert_eq!(CacheWindow::compute(4, 5, 1).indices(), &[4, 3, 2]);
        assert_eq!(CacheWindow::compute(0, 2, 3).indices(), &[0, 1]);
        assert!(CacheWindow::compute(0, 0, 3).is_empty());
        assert_eq!(CacheWindow::compute(0, 0, 3).cursor(), None);
        assert_eq!(CacheWindow::compute(1, 5, 0).indices(), &[1]);
    }

    #[test]
    fn test_window_matches_brute_force() {
        for len in 0..12usize {
            for cursor in 0..len {
                for radius in 0..5usize {
                    let window = CacheWindow::compute(cursor, len, radius);
                    assert_eq!(window.len(), (2 * radius + 1).min(len));

                    let mut by_distance: Vec<usize> = (0..len).collect();
                    by_distance.sort_by_key(|&i| (i.abs_diff(cursor), i));
                    by_distance.truncate(window.len());
                    assert_eq!(window.indices(), by_distance.as_slice());
                }
            }
        }
    }

    #[test]
    fn test_departed_is_set_difference() {
        let before = CacheWindow::compute(2, 5, 1);
        let after = CacheWindow::compute(4, 5, 1);
        assert_eq!(before.departed(&after), vec![1]);
        assert_eq!(after.departed(&before), vec![4]);
        assert!(before.departed(&before).is_empty());
        assert_eq!(before.departed(&CacheWindow::default()), vec![1, 2, 3]);
    }

    #[test]
    fn test_huge_radius_does_not_overflow() {
        let window = CacheWindow::compute(1, 3, usize::MAX);
        assert_eq!(window.indices(), &[1, 0, 2]);
    }
}
