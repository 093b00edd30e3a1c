//! Deterministic ordering for multi-face images.
//!
//! Group save and group recognition both pair caller-supplied names with
//! detected faces by position, so the two sides must agree on one ordering:
//! ascending bounding-box x, ties broken by ascending y.

use std::cmp::Ordering;

use crate::types::BoundingBox;

/// Sort faces into left-to-right reading order.
///
/// Ascending x-coordinate of the bounding box, ties by ascending y. The sort
/// is stable, so detections with bit-identical coordinates keep their
/// relative order.
pub fn sort_reading_order<T: AsRef<BoundingBox>>(faces: &mut [T]) {
    faces.sort_by(|a, b| {
        let (a, b) = (a.as_ref(), b.as_ref());
        compare(a.x, b.x).then_with(|| compare(a.y, b.y))
    });
}

fn compare(a: f32, b: f32) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: 80.0,
            height: 80.0,
            confidence: 0.9,
            landmarks: None,
        }
    }

    #[test]
    fn sorts_by_x_ascending() {
        // Upload order [10, 200, 50] must become [10, 50, 200]: a caller
        // naming positions "A,B,C" gets A at x=10, B at x=50, C at x=200.
        let mut faces = vec![bbox(10.0, 0.0), bbox(200.0, 0.0), bbox(50.0, 0.0)];
        sort_reading_order(&mut faces);

        let xs: Vec<f32> = faces.iter().map(|f| f.x).collect();
        assert_eq!(xs, vec![10.0, 50.0, 200.0]);
    }

    #[test]
    fn x_ties_break_by_y_ascending() {
        let mut faces = vec![bbox(40.0, 300.0), bbox(40.0, 20.0), bbox(5.0, 999.0)];
        sort_reading_order(&mut faces);

        let pos: Vec<(f32, f32)> = faces.iter().map(|f| (f.x, f.y)).collect();
        assert_eq!(pos, vec![(5.0, 999.0), (40.0, 20.0), (40.0, 300.0)]);
    }

    #[test]
    fn empty_and_single_are_fine() {
        let mut none: Vec<BoundingBox> = vec![];
        sort_reading_order(&mut none);
        assert!(none.is_empty());

        let mut one = vec![bbox(1.0, 1.0)];
        sort_reading_order(&mut one);
        assert_eq!(one.len(), 1);
    }
}
