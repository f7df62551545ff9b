//! Stamp extraction around a predicted line position.

use crate::frame::CalibrationFrame;

use super::DetectionFailure;

/// A rectangular cut-out of the frame, in pixel-index space.
///
/// Bad, non-finite and out-of-frame pixels are stored as NaN and skipped by
/// every consumer.
#[derive(Debug, Clone)]
pub struct Stamp {
    /// Frame column of the stamp's first column.
    pub col0: i64,
    /// Frame row of the stamp's first row.
    pub row0: i64,
    pub width: usize,
    pub height: usize,
    values: Vec<f64>,
}

impl Stamp {
    /// Cut a `(2·win_x+1) × (2·win_y+1)` window centred on the pixel nearest
    /// to `(x_px, y_px)`, clipped to the frame.
    ///
    /// Fails with [`DetectionFailure::StampOutOfBounds`] when no part of the
    /// window overlaps the frame.
    pub fn extract(
        frame: &CalibrationFrame,
        x_px: f64,
        y_px: f64,
        win_x: u32,
        win_y: u32,
    ) -> Result<Self, DetectionFailure> {
        // Also keeps far-off positions away from saturating integer casts.
        let reaches = |centre: f64, win: u32, size: u32| {
            centre.is_finite() && centre >= -(win as f64) - 1.0 && centre <= size as f64 + win as f64
        };
        if !(reaches(x_px, win_x, frame.width()) && reaches(y_px, win_y, frame.height())) {
            return Err(DetectionFailure::StampOutOfBounds);
        }
        let cc = x_px.round() as i64;
        let cr = y_px.round() as i64;
        let (win_x, win_y) = (win_x as i64, win_y as i64);

        let c_lo = (cc - win_x).max(0);
        let c_hi = (cc + win_x).min(frame.width() as i64 - 1);
        let r_lo = (cr - win_y).max(0);
        let r_hi = (cr + win_y).min(frame.height() as i64 - 1);
        if c_lo > c_hi || r_lo > r_hi {
            return Err(DetectionFailure::StampOutOfBounds);
        }

        let width = (c_hi - c_lo + 1) as usize;
        let height = (r_hi - r_lo + 1) as usize;
        let mut values = Vec::with_capacity(width * height);
        for row in r_lo..=r_hi {
            for col in c_lo..=c_hi {
                values.push(frame.value(col, row).map_or(f64::NAN, f64::from));
            }
        }

        Ok(Self {
            col0: c_lo,
            row0: r_lo,
            width,
            height,
            values,
        })
    }

    /// Value at stamp-local `(i, j)`; `None` for invalid pixels.
    pub fn get(&self, i: usize, j: usize) -> Option<f64> {
        let v = self.values[j * self.width + i];
        v.is_finite().then_some(v)
    }

    /// `(frame_col, frame_row, value)` of every valid pixel.
    pub fn valid_pixels(&self) -> impl Iterator<Item = (f64, f64, f64)> + '_ {
        self.values.iter().enumerate().filter_map(move |(idx, &v)| {
            v.is_finite().then(|| {
                let i = (idx % self.width) as i64;
                let j = (idx / self.width) as i64;
                ((self.col0 + i) as f64, (self.row0 + j) as f64, v)
            })
        })
    }

    pub fn valid_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_finite()).count()
    }

    /// Subtract a constant from every valid pixel.
    pub fn offset(&mut self, delta: f64) {
        for v in self.values.iter_mut().filter(|v| v.is_finite()) {
            *v -= delta;
        }
    }

    /// Whether a frame pixel position lies on the stamp (pixel edges included).
    pub fn contains(&self, x_px: f64, y_px: f64) -> bool {
        let x_lo = self.col0 as f64 - 0.5;
        let y_lo = self.row0 as f64 - 0.5;
        x_px >= x_lo
            && x_px <= x_lo + self.width as f64
            && y_px >= y_lo
            && y_px <= y_lo + self.height as f64
    }

    /// Largest side in pixels.
    pub fn extent(&self) -> usize {
        self.width.max(self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_frame(width: u32, height: u32) -> CalibrationFrame {
        let data = (0..width * height).map(|i| i as f32).collect();
        CalibrationFrame::from_raw(width, height, data, None).unwrap()
    }

    #[test]
    fn test_full_stamp() {
        let frame = ramp_frame(20, 10);
        let stamp = Stamp::extract(&frame, 10.4, 5.6, 3, 2).unwrap();
        assert_eq!((stamp.col0, stamp.row0), (7, 4));
        assert_eq!((stamp.width, stamp.height), (7, 5));
        assert_eq!(stamp.get(0, 0), Some((4 * 20 + 7) as f64));
        assert_eq!(stamp.valid_count(), 35);
    }

    #[test]
    fn test_clipped_at_edge() {
        let frame = ramp_frame(20, 10);
        let stamp = Stamp::extract(&frame, 0.2, 9.0, 3, 2).unwrap();
        assert_eq!((stamp.col0, stamp.row0), (0, 7));
        assert_eq!((stamp.width, stamp.height), (4, 3));
    }

    #[test]
    fn test_entirely_outside() {
        let frame = ramp_frame(20, 10);
        assert_eq!(
            Stamp::extract(&frame, -10.0, 5.0, 3, 2).unwrap_err(),
            DetectionFailure::StampOutOfBounds
        );
        assert_eq!(
            Stamp::extract(&frame, 5.0, 13.0, 3, 2).unwrap_err(),
            DetectionFailure::StampOutOfBounds
        );
        assert_eq!(
            Stamp::extract(&frame, f64::NAN, 5.0, 3, 2).unwrap_err(),
            DetectionFailure::StampOutOfBounds
        );
    }

    #[test]
    fn test_far_off_positions_are_out_of_bounds() {
        let frame = ramp_frame(20, 10);
        for (x, y) in [(1e20, 5.0), (-1e20, 5.0), (10.0, 1e20), (10.0, -1e20), (f64::MAX, f64::MIN)] {
            assert_eq!(
                Stamp::extract(&frame, x, y, u32::MAX, u32::MAX).unwrap_err(),
                DetectionFailure::StampOutOfBounds
            );
            assert_eq!(
                Stamp::extract(&frame, x, y, 3, 2).unwrap_err(),
                DetectionFailure::StampOutOfBounds
            );
        }
        // Just beyond the edge the window still overlaps the frame.
        let stamp = Stamp::extract(&frame, -3.4, 11.4, 3, 2).unwrap();
        assert_eq!((stamp.col0, stamp.row0), (0, 9));
        assert_eq!((stamp.width, stamp.height), (1, 1));
    }

    #[test]
    fn test_masked_pixels_skipped() {
        let mut mask = vec![false; 25];
        mask[12] = true;
        let frame = CalibrationFrame::from_raw(5, 5, vec![1.0; 25], Some(mask)).unwrap();
        let mut stamp = Stamp::extract(&frame, 2.0, 2.0, 1, 1).unwrap();
        assert_eq!(stamp.valid_count(), 8);
        assert_eq!(stamp.get(1, 1), None);
        stamp.offset(1.0);
        assert!(stamp.valid_pixels().all(|(_, _, v)| v == 0.0));
    }

    #[test]
    fn test_contains() {
        let frame = ramp_frame(20, 10);
        let stamp = Stamp::extract(&frame, 10.0, 5.0, 2, 2).unwrap();
        assert!(stamp.contains(10.0, 5.0));
        assert!(stamp.contains(7.5, 2.5));
        assert!(!stamp.contains(7.4, 5.0));
        assert!(!stamp.contains(10.0, 7.6));
    }
}
