// Copyright 2026 the Stipple Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Integer rectangles in surface pixel space.

/// An axis-aligned rectangle with its origin at the top-left corner.
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq, Hash)]
pub struct Rect {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Rect {
    /// Creates a rectangle from its origin and size.
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Creates a rectangle at the origin.
    pub const fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Whether the rectangle covers no pixels.
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Exclusive right edge, clamped to `i32::MAX`.
    pub const fn right(&self) -> i32 {
        self.x.saturating_add_unsigned(self.width)
    }

    /// Exclusive bottom edge, clamped to `i32::MAX`.
    pub const fn bottom(&self) -> i32 {
        self.y.saturating_add_unsigned(self.height)
    }

    /// Number of pixels covered.
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Returns the overlapping region, or `None` if the rectangles are disjoint.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left || bottom <= top {
            return None;
        }
        Some(Self::new(
            left,
            top,
            right.abs_diff(left),
            bottom.abs_diff(top),
        ))
    }

    /// Whether any pixel is shared.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.intersect(other).is_some()
    }

    /// Whether `other` lies entirely inside `self`.
    pub fn contains(&self, other: &Self) -> bool {
        !other.is_empty()
            && other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Returns a copy moved by `(dx, dy)`, saturating at the edges of `i32`.
    pub const fn translate(&self, dx: i32, dy: i32) -> Self {
        Self::new(
            self.x.saturating_add(dx),
            self.y.saturating_add(dy),
            self.width,
            self.height,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::Rect;

    #[test]
    fn intersect_and_contain() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, 5, 10, 10);
        assert_eq!(a.intersect(&b), Some(Rect::new(5, 5, 5, 5)));
        assert!(a.overlaps(&b));
        assert!(!a.contains(&b));
        assert!(a.contains(&Rect::new(2, 2, 3, 3)));
        assert_eq!(a.intersect(&Rect::new(10, 0, 4, 4)), None);
    }

    #[test]
    fn edges_clamp_instead_of_overflowing() {
        let far = Rect::new(i32::MAX - 2, 0, 8, 8);
        assert_eq!(far.right(), i32::MAX);
        assert_eq!(far.bottom(), 8);
        assert_eq!(Rect::new(0, 0, u32::MAX, 1).right(), i32::MAX);

        let screen = Rect::from_size(64, 64);
        assert_eq!(screen.intersect(&far), None);
        let huge = Rect::new(i32::MIN, i32::MIN, u32::MAX, u32::MAX);
        assert_eq!(huge.intersect(&screen), Some(screen));
        assert_eq!(
            Rect::new(i32::MIN, 0, u32::MAX, 1).intersect(&Rect::new(i32::MAX - 1, 0, 1, 1)),
            Some(Rect::new(i32::MAX - 1, 0, 1, 1))
        );
        assert_eq!(far.translate(10, -3), Rect::new(i32::MAX, -3, 8, 8));
    }
}
