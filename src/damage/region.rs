//! Damage rectangles

/// A rectangular region that changed since the last flush
///
/// Regions are axis-aligned rectangles in window-local pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DamageRegion {
    /// X coordinate (pixels)
    pub x: i32,
    /// Y coordinate (pixels)
    pub y: i32,
    /// Width (pixels)
    pub width: u32,
    /// Height (pixels)
    pub height: u32,
}

impl DamageRegion {
    /// Creates a new damage region
    ///
    /// # Example
    ///
    /// ```
    /// use xwl_bridge::damage::DamageRegion;
    ///
    /// let region = DamageRegion::new(100, 100, 200, 150);
    /// assert_eq!(region.area(), 30000);
    /// ```
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Returns the area of this region in pixels
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Checks if this region intersects another region
    pub fn intersects(&self, other: &DamageRegion) -> bool {
        !(self.x + self.width as i32 <= other.x
            || other.x + other.width as i32 <= self.x
            || self.y + self.height as i32 <= other.y
            || other.y + other.height as i32 <= self.y)
    }

    /// Smallest rectangle containing both regions
    pub fn union(&self, other: &DamageRegion) -> DamageRegion {
        let x1 = self.x.min(other.x);
        let y1 = self.y.min(other.y);
        let x2 = (self.x + self.width as i32).max(other.x + other.width as i32);
        let y2 = (self.y + self.height as i32).max(other.y + other.height as i32);

        DamageRegion {
            x: x1,
            y: y1,
            width: (x2 - x1) as u32,
            height: (y2 - y1) as u32,
        }
    }

    /// Bounding box of a list of regions, `None` for an empty list
    pub fn bounding(regions: &[DamageRegion]) -> Option<DamageRegion> {
        let (first, rest) = regions.split_first()?;
        Some(rest.iter().fold(*first, |acc, r| acc.union(r)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_damage_region_area() {
        assert_eq!(DamageRegion::new(0, 0, 100, 50).area(), 5000);
        assert!(DamageRegion::new(3, 3, 0, 10).is_empty());
    }

    #[test]
    fn test_damage_region_intersection() {
        let a = DamageRegion::new(0, 0, 100, 100);
        let b = DamageRegion::new(50, 50, 100, 100);
        let c = DamageRegion::new(100, 0, 10, 10);

        assert!(a.intersects(&b));
        assert!(!a.intersects(&c), "touching edges do not intersect");
    }

    #[test]
    fn test_damage_region_union() {
        let a = DamageRegion::new(0, 0, 50, 50);
        let b = DamageRegion::new(100, 100, 50, 50);
        assert_eq!(a.union(&b), DamageRegion::new(0, 0, 150, 150));
    }

    #[test]
    fn test_bounding() {
        assert_eq!(DamageRegion::bounding(&[]), None);

        let regions = [
            DamageRegion::new(10, 20, 5, 5),
            DamageRegion::new(-5, 30, 10, 2),
            DamageRegion::new(40, 0, 1, 1),
        ];
        assert_eq!(
            DamageRegion::bounding(&regions),
            Some(DamageRegion::new(-5, 0, 46, 32))
        );
    }
}
