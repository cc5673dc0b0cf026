//! # Convolution Geometry
//!
//! Output sizes for any layer that slides a `filter_width × filter_height`
//! window over a depth-minor image:
//!
//! ```text
//!   output_width  = ⌊(input_width  − filter_width)  / stride_x⌋ + 1
//!   output_height = ⌊(input_height − filter_height) / stride_y⌋ + 1
//!   output_depth  = filter_count
//! ```
//!
//! Windows that would run past the right or bottom edge are dropped, and an
//! input smaller than the filter has no windows at all.

use serde::{Deserialize, Serialize};

/// Filter, stride and input dimensions of a sliding-window layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConvGeometry {
    pub filter_count: usize,
    pub filter_width: usize,
    pub filter_height: usize,
    pub stride_x: usize,
    pub stride_y: usize,
    pub input_width: usize,
    pub input_height: usize,
    pub input_depth: usize,
}

impl ConvGeometry {
    /// Number of window positions along x.
    pub fn output_width(&self) -> usize {
        output_dim(self.input_width, self.filter_width, self.stride_x)
    }

    /// Number of window positions along y.
    pub fn output_height(&self) -> usize {
        output_dim(self.input_height, self.filter_height, self.stride_y)
    }

    /// Channels per output position.
    pub fn output_depth(&self) -> usize {
        self.filter_count
    }

    /// Elements in one input image.
    pub fn input_size(&self) -> usize {
        self.input_width * self.input_height * self.input_depth
    }

    /// Elements in one output image.
    pub fn output_size(&self) -> usize {
        self.output_width() * self.output_height() * self.output_depth()
    }

    /// Elements in one extracted window, across every input channel.
    pub fn window_size(&self) -> usize {
        self.filter_width * self.filter_height * self.input_depth
    }
}

fn output_dim(input: usize, filter: usize, stride: usize) -> usize {
    assert!(stride > 0, "stride must be positive");
    match input.checked_sub(filter) {
        Some(slack) => slack / stride + 1,
        None => 0,
    }
}
