//! Adaptive slow-start prefetch depth (spec §4.3 "Adaptive prefetch").
//!
//! Depth is a pure function of scan shape and how many leaves have been
//! scanned so far; it holds no state of its own; `cursor.rs` tracks
//! `pages_scanned` and calls [`depth_for`] once per new leaf.

/// Which of the three shapes a forward scan's key range falls into, as
/// distinguished by §4.3's three depth tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanShape {
    Equality,
    Bounded,
    UnboundedForward,
}

/// `pages_scanned` is how many leaves this cursor has already visited
/// (0 for the first leaf). `max_depth` is `Config::max_prefetch_depth`.
pub fn depth_for(shape: ScanShape, pages_scanned: u32, max_depth: u16) -> u16 {
    match shape {
        ScanShape::Equality => {
            if pages_scanned <= 1 {
                0
            } else if pages_scanned <= 4 {
                1u16.min(max_depth)
            } else {
                2u16.min(max_depth)
            }
        }
        ScanShape::Bounded => {
            if pages_scanned <= 2 {
                0
            } else if pages_scanned <= 7 {
                1u16.min(max_depth)
            } else if pages_scanned <= 19 {
                2u16.min(max_depth)
            } else if pages_scanned <= 49 {
                4u16.min(max_depth)
            } else {
                ((pages_scanned / 10) as u16).min(max_depth)
            }
        }
        ScanShape::UnboundedForward => max_depth,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_slow_start() {
        assert_eq!(depth_for(ScanShape::Equality, 0, 8), 0);
        assert_eq!(depth_for(ScanShape::Equality, 1, 8), 0);
        assert_eq!(depth_for(ScanShape::Equality, 2, 8), 1);
        assert_eq!(depth_for(ScanShape::Equality, 4, 8), 1);
        assert_eq!(depth_for(ScanShape::Equality, 5, 8), 2);
        assert_eq!(depth_for(ScanShape::Equality, 100, 1), 1);
    }

    #[test]
    fn bounded_slow_start() {
        assert_eq!(depth_for(ScanShape::Bounded, 2, 8), 0);
        assert_eq!(depth_for(ScanShape::Bounded, 3, 8), 1);
        assert_eq!(depth_for(ScanShape::Bounded, 7, 8), 1);
        assert_eq!(depth_for(ScanShape::Bounded, 8, 8), 2);
        assert_eq!(depth_for(ScanShape::Bounded, 19, 8), 2);
        assert_eq!(depth_for(ScanShape::Bounded, 20, 8), 4);
        assert_eq!(depth_for(ScanShape::Bounded, 49, 8), 4);
        assert_eq!(depth_for(ScanShape::Bounded, 80, 8), 8);
    }

    #[test]
    fn unbounded_forward_is_max_depth_immediately() {
        assert_eq!(depth_for(ScanShape::UnboundedForward, 0, 8), 8);
    }
}
