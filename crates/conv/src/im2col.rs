//! # Window Extraction
//!
//! [`window_map`] builds the gather table that copies every complete filter
//! window of a depth-minor image into one contiguous buffer.
//!
//! Windows are visited top-to-bottom, then left-to-right. Inside a window the
//! values are grouped by channel, so each channel's `filter_width ×
//! filter_height` patch is contiguous:
//!
//! ```text
//!   image (w=3, h=2, d=1)      windows (2×2, stride 1)
//!   ┌───┬───┬───┐
//!   │ a │ b │ c │              [a b d e] [b c e f]
//!   ├───┼───┼───┤
//!   │ d │ e │ f │
//!   └───┴───┴───┘
//! ```
//!
//! Image element `(x, y, z)` sits at `(y·width + x)·depth + z`.

use seqnet_core::IndexMap;

use crate::geometry::ConvGeometry;

/// The window-extraction map for `geometry`.
///
/// Its input is one image; its output is `output_width × output_height`
/// windows of [`ConvGeometry::window_size`] values each.
pub fn window_map(geometry: &ConvGeometry) -> IndexMap {
    let g = geometry;
    let (out_w, out_h) = (g.output_width(), g.output_height());
    let mut table = Vec::with_capacity(out_w * out_h * g.window_size());
    for oy in 0..out_h {
        let y = oy * g.stride_y;
        for ox in 0..out_w {
            let x = ox * g.stride_x;
            for z in 0..g.input_depth {
                for sub_y in 0..g.filter_height {
                    let row = (y + sub_y) * g.input_width;
                    for sub_x in 0..g.filter_width {
                        table.push((row + x + sub_x) * g.input_depth + z);
                    }
                }
            }
        }
    }
    IndexMap::new(g.input_size(), table)
}
