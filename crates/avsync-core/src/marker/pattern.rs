//! Visual marker codec
//!
//! Encodes a marker index into an 8x8 grid of black/white cells rendered as
//! a centered square, and decodes it back from a monitored luma frame.
//! The grid carries a fixed sync row (and its complement) for recognition
//! plus a 32-bit index protected by CRC-16, so frames that do not contain a
//! freshly rendered marker decode to `None` rather than a bogus index.

use crate::pipeline::VideoFrame;

/// Cells per grid side
const GRID: usize = 8;

/// Fixed pattern for the top sync row (bottom row is its complement)
const SYNC_ROW: u8 = 0b1011_0010;

/// Luma for dark cells
const CELL_DARK: u8 = 0;

/// Luma for bright cells
const CELL_BRIGHT: u8 = 255;

/// Minimum bright/dark spread for a frame to count as containing a marker
const MIN_CONTRAST: u16 = 64;

/// CRC-16/CCITT-FALSE over the index bytes
fn crc16(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &b in bytes {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Pack the 64 grid bits for an index: sync row, 48-bit payload, inverse
/// sync row. Bit 0 is the top-left cell, row-major, MSB-first per row.
fn grid_bits(index: u32) -> [bool; GRID * GRID] {
    let payload: u64 = ((index as u64) << 16) | crc16(&index.to_be_bytes()) as u64;
    let mut bits = [false; GRID * GRID];
    for col in 0..GRID {
        let mask = 0x80 >> col;
        bits[col] = SYNC_ROW & mask != 0;
        bits[(GRID - 1) * GRID + col] = SYNC_ROW & mask == 0;
    }
    for k in 0..48 {
        // MSB of the payload lands in row 1, column 0
        let bit = payload & (1 << (47 - k)) != 0;
        bits[GRID + k] = bit;
    }
    bits
}

/// Marker square geometry within a frame: (origin_x, origin_y, cell_size).
///
/// The marker occupies a centered square spanning half the frame's minor
/// dimension. Returns `None` when the frame is too small to hold one
/// decodable cell per grid position.
fn marker_rect(width: usize, height: usize) -> Option<(usize, usize, usize)> {
    let side = width.min(height) / 2;
    let cell = side / GRID;
    if cell < 2 {
        return None;
    }
    let side = cell * GRID;
    Some(((width - side) / 2, (height - side) / 2, cell))
}

/// Render the marker for `index` into the frame.
///
/// The rest of the frame is left untouched; callers typically start from a
/// uniform background. Frames smaller than the minimum marker size are left
/// unmodified.
pub fn render_marker(frame: &mut VideoFrame, index: u32) {
    let Some((x0, y0, cell)) = marker_rect(frame.width, frame.height) else {
        tracing::warn!(
            width = frame.width,
            height = frame.height,
            "frame too small for marker, skipped"
        );
        return;
    };

    let bits = grid_bits(index);
    for row in 0..GRID {
        for col in 0..GRID {
            let luma = if bits[row * GRID + col] {
                CELL_BRIGHT
            } else {
                CELL_DARK
            };
            for dy in 0..cell {
                let line = (y0 + row * cell + dy) * frame.width;
                let start = line + x0 + col * cell;
                frame.data[start..start + cell].fill(luma);
            }
        }
    }
}

/// Sample one cell: average of the center and four inset neighbors.
fn sample_cell(frame: &VideoFrame, x0: usize, y0: usize, cell: usize, row: usize, col: usize) -> u16 {
    let cx = x0 + col * cell + cell / 2;
    let cy = y0 + row * cell + cell / 2;
    let inset = (cell / 4).max(1);
    let points = [
        (cx, cy),
        (cx - inset, cy),
        (cx + inset, cy),
        (cx, cy - inset),
        (cx, cy + inset),
    ];
    let sum: u32 = points.iter().map(|&(x, y)| frame.luma(x, y) as u32).sum();
    (sum / points.len() as u32) as u16
}

/// Attempt to decode a marker index from a frame.
///
/// Returns `None` for frames without a recognizable marker: insufficient
/// contrast, sync rows that do not match, or a failed checksum. This is the
/// expected common case on a monitored path and is not an error. The work
/// is a fixed number of cell samples per frame, independent of content.
pub fn decode_marker(frame: &VideoFrame) -> Option<u32> {
    let (x0, y0, cell) = marker_rect(frame.width, frame.height)?;

    let mut levels = [0u16; GRID * GRID];
    let mut min = u16::MAX;
    let mut max = 0u16;
    for row in 0..GRID {
        for col in 0..GRID {
            let level = sample_cell(frame, x0, y0, cell, row, col);
            levels[row * GRID + col] = level;
            min = min.min(level);
            max = max.max(level);
        }
    }

    if max - min < MIN_CONTRAST {
        return None;
    }

    // Adaptive threshold at the midpoint of the observed luma range
    let threshold = (min + max) / 2;
    let mut sync: u8 = 0;
    let mut inv_sync: u8 = 0;
    let mut payload: u64 = 0;
    for col in 0..GRID {
        if levels[col] > threshold {
            sync |= 0x80 >> col;
        }
        if levels[(GRID - 1) * GRID + col] > threshold {
            inv_sync |= 0x80 >> col;
        }
    }
    if sync != SYNC_ROW || inv_sync != !SYNC_ROW {
        return None;
    }
    for k in 0..48 {
        if levels[GRID + k] > threshold {
            payload |= 1 << (47 - k);
        }
    }

    let index = (payload >> 16) as u32;
    let checksum = (payload & 0xFFFF) as u16;
    if checksum != crc16(&index.to_be_bytes()) {
        tracing::trace!(index, "marker checksum mismatch, frame rejected");
        return None;
    }
    Some(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker_frame(width: usize, height: usize, index: u32) -> VideoFrame {
        let mut frame = VideoFrame::filled(width, height, 16);
        render_marker(&mut frame, index);
        frame
    }

    #[test]
    fn test_roundtrip() {
        for &index in &[0u32, 1, 5, 42, 65535, u32::MAX] {
            let frame = marker_frame(320, 240, index);
            assert_eq!(
                decode_marker(&frame),
                Some(index),
                "index {} should survive encode/decode",
                index
            );
        }
    }

    #[test]
    fn test_roundtrip_various_resolutions() {
        for &(w, h) in &[(64, 64), (320, 180), (640, 480), (1920, 1080)] {
            let frame = marker_frame(w, h, 1234);
            assert_eq!(decode_marker(&frame), Some(1234), "failed at {}x{}", w, h);
        }
    }

    #[test]
    fn test_blank_frame_no_marker() {
        let frame = VideoFrame::filled(320, 240, 128);
        assert!(decode_marker(&frame).is_none(), "uniform frame has no marker");
    }

    #[test]
    fn test_gradient_frame_no_marker() {
        let mut frame = VideoFrame::filled(320, 240, 0);
        for y in 0..240 {
            for x in 0..320 {
                frame.data[y * 320 + x] = (x * 255 / 319) as u8;
            }
        }
        assert!(decode_marker(&frame).is_none(), "gradient must not decode");
    }

    #[test]
    fn test_corrupted_marker_rejected() {
        let mut frame = marker_frame(320, 240, 777);
        // Invert a band through the payload rows
        let (x0, y0, cell) = super::marker_rect(320, 240).unwrap();
        for dy in 0..cell {
            let line = (y0 + 3 * cell + dy) * frame.width;
            for x in x0..x0 + cell * GRID {
                frame.data[line + x] = 255 - frame.data[line + x];
            }
        }
        assert!(
            decode_marker(&frame).is_none(),
            "corrupted payload must fail the checksum"
        );
    }

    #[test]
    fn test_tiny_frame_skipped() {
        let mut frame = VideoFrame::filled(8, 8, 16);
        render_marker(&mut frame, 9);
        assert!(decode_marker(&frame).is_none());
    }

    #[test]
    fn test_marker_survives_mild_level_shift() {
        let mut frame = marker_frame(320, 240, 31337);
        // Simulate a video path that compresses levels toward the middle
        for v in frame.data.iter_mut() {
            *v = 32 + (*v as u16 * 3 / 4).min(223) as u8;
        }
        assert_eq!(decode_marker(&frame), Some(31337));
    }

    #[test]
    fn test_crc16_known_vector() {
        // CRC-16/CCITT-FALSE("123456789") = 0x29B1
        assert_eq!(super::crc16(b"123456789"), 0x29B1);
    }
}
