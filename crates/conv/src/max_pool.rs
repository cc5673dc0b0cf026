//! # Max Pooling
//!
//! [`MaxPool`] slides a `span_x × span_y` window over each channel of a
//! depth-minor image and keeps the largest value in every window.
//!
//! ## Forward
//!
//! Pooling is two gathers back to back:
//!
//! ```text
//!   image ──window map──► windows ──argmax map──► pooled
//!          (fixed, built once)      (per sample, per call)
//! ```
//!
//! The window map depends only on the layer's geometry, so it is built on
//! first use and shared by every later call. The argmax map depends on the
//! data and is recorded per sample in the result.
//!
//! ## Backward
//!
//! The two transposes in reverse order. The argmax transpose sends each
//! pooled gradient to the winning slot of its window; the window transpose
//! adds window slots back into image positions, so a pixel shared by
//! overlapping windows collects every contribution.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use seqnet_core::Tensor;
//! use seqnet_conv::MaxPool;
//! use seqnet_diff::{Const, Layer};
//!
//! let pool = MaxPool::new(2, 2, 4, 4, 1);
//! let image = Tensor::from((1..=16).map(|v| v as f32).collect::<Vec<_>>());
//! let out = pool.apply(Arc::new(Const(image)), 1);
//! assert_eq!(out.output().data, vec![6.0, 8.0, 14.0, 16.0]);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use seqnet_core::serializer::{deserialize_fields, serialize_fields};
use seqnet_core::{IndexMap, SerializeError, Serializer, Tensor};
use seqnet_diff::{Grad, Layer, Res, VarSet};
use tracing::debug;

use crate::geometry::ConvGeometry;
use crate::im2col::window_map;

/// A max-pooling layer over row-major, depth-minor images.
///
/// Input values in an incomplete window at the right or bottom edge are
/// ignored.
///
/// The geometry is fixed at construction and only readable through getters,
/// so the cached window map always matches it.
#[derive(Debug, Clone)]
pub struct MaxPool {
    span_x: usize,
    span_y: usize,
    stride_x: usize,
    stride_y: usize,
    input_width: usize,
    input_height: usize,
    input_depth: usize,
    windows: OnceCell<Arc<IndexMap>>,
}

/// Plain-data description of a [`MaxPool`], e.g. loaded from JSON.
///
/// Strides default to the span, giving non-overlapping windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaxPoolConfig {
    pub span_x: usize,
    pub span_y: usize,
    #[serde(default)]
    pub stride_x: Option<usize>,
    #[serde(default)]
    pub stride_y: Option<usize>,
    pub input_width: usize,
    pub input_height: usize,
    pub input_depth: usize,
}

impl MaxPoolConfig {
    /// Parse a config from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl From<MaxPoolConfig> for MaxPool {
    fn from(config: MaxPoolConfig) -> Self {
        MaxPool::with_stride(
            config.span_x,
            config.span_y,
            config.stride_x.unwrap_or(config.span_x),
            config.stride_y.unwrap_or(config.span_y),
            config.input_width,
            config.input_height,
            config.input_depth,
        )
    }
}

impl MaxPool {
    /// Type tag used when persisting a max-pooling layer.
    pub const SERIALIZER_TYPE: &'static str = "seqnet_conv::MaxPool";

    /// A pool with non-overlapping windows (stride equal to span).
    pub fn new(
        span_x: usize,
        span_y: usize,
        input_width: usize,
        input_height: usize,
        input_depth: usize,
    ) -> Self {
        Self::with_stride(
            span_x,
            span_y,
            span_x,
            span_y,
            input_width,
            input_height,
            input_depth,
        )
    }

    /// A pool with explicit strides.
    pub fn with_stride(
        span_x: usize,
        span_y: usize,
        stride_x: usize,
        stride_y: usize,
        input_width: usize,
        input_height: usize,
        input_depth: usize,
    ) -> Self {
        Self {
            span_x,
            span_y,
            stride_x,
            stride_y,
            input_width,
            input_height,
            input_depth,
            windows: OnceCell::new(),
        }
    }

    /// Window width.
    pub fn span_x(&self) -> usize {
        self.span_x
    }

    /// Window height.
    pub fn span_y(&self) -> usize {
        self.span_y
    }

    /// Horizontal distance between window origins.
    pub fn stride_x(&self) -> usize {
        self.stride_x
    }

    /// Vertical distance between window origins.
    pub fn stride_y(&self) -> usize {
        self.stride_y
    }

    pub fn input_width(&self) -> usize {
        self.input_width
    }

    pub fn input_height(&self) -> usize {
        self.input_height
    }

    pub fn input_depth(&self) -> usize {
        self.input_depth
    }

    /// The equivalent convolution geometry: one filter per input channel.
    pub fn geometry(&self) -> ConvGeometry {
        ConvGeometry {
            filter_count: self.input_depth,
            filter_width: self.span_x,
            filter_height: self.span_y,
            stride_x: self.stride_x,
            stride_y: self.stride_y,
            input_width: self.input_width,
            input_height: self.input_height,
            input_depth: self.input_depth,
        }
    }

    /// Width of the pooled output.
    pub fn output_width(&self) -> usize {
        self.geometry().output_width()
    }

    /// Height of the pooled output.
    pub fn output_height(&self) -> usize {
        self.geometry().output_height()
    }

    /// Depth of the pooled output, always the input depth.
    pub fn output_depth(&self) -> usize {
        self.input_depth
    }

    /// Elements in one input image.
    pub fn input_size(&self) -> usize {
        self.input_width * self.input_height * self.input_depth
    }

    /// The window-extraction map, built on first use.
    ///
    /// Concurrent first callers block until one of them has built it; all
    /// of them get the same map.
    pub fn windows(&self) -> &Arc<IndexMap> {
        self.windows.get_or_init(|| {
            assert!(
                self.span_x > 0 && self.span_y > 0,
                "MaxPool spans must be positive"
            );
            let map = window_map(&self.geometry());
            debug!(
                span_x = self.span_x,
                span_y = self.span_y,
                windows = self.output_width() * self.output_height(),
                entries = map.out_size(),
                "built max-pool window map"
            );
            Arc::new(map)
        })
    }

    /// Decode a pool written by [`Serializer::serialize`].
    ///
    /// Accepts the current 7-field record and the legacy 5-field record,
    /// which had no strides; legacy pools get strides equal to their spans.
    pub fn deserialize(data: &[u8]) -> Result<MaxPool, SerializeError> {
        let fields: Vec<u64> =
            deserialize_fields(data).map_err(|e| e.context("deserialize MaxPool"))?;
        let (span_x, span_y, width, height, depth, stride_x, stride_y) = match fields[..] {
            [sx, sy, w, h, d, stx, sty] => (sx, sy, w, h, d, stx, sty),
            [sx, sy, w, h, d] => {
                debug!(span_x = sx, span_y = sy, "decoding legacy max-pool record");
                (sx, sy, w, h, d, sx, sy)
            }
            _ => {
                return Err(SerializeError::FieldCount {
                    expected: "5 or 7",
                    got: fields.len(),
                }
                .context("deserialize MaxPool"))
            }
        };
        for (field, value) in [
            ("span_x", span_x),
            ("span_y", span_y),
            ("stride_x", stride_x),
            ("stride_y", stride_y),
        ] {
            if value == 0 {
                return Err(
                    SerializeError::InvalidField { field, value }.context("deserialize MaxPool")
                );
            }
        }
        Ok(MaxPool::with_stride(
            span_x as usize,
            span_y as usize,
            stride_x as usize,
            stride_y as usize,
            width as usize,
            height as usize,
            depth as usize,
        ))
    }
}

impl PartialEq for MaxPool {
    fn eq(&self, other: &Self) -> bool {
        self.geometry() == other.geometry()
    }
}

impl Layer for MaxPool {
    /// Pool `batch` images stored back to back in `input`.
    ///
    /// Panics with "incorrect input size" unless the input holds exactly
    /// `batch` images.
    fn apply(&self, input: Arc<dyn Res>, batch: usize) -> Arc<dyn Res> {
        let image_size = self.input_size();
        assert_eq!(
            input.output().len(),
            batch * image_size,
            "incorrect input size"
        );
        let windows = self.windows().clone();
        let group = self.span_x * self.span_y;

        let samples: Vec<(Tensor, IndexMap)> = (0..batch)
            .into_par_iter()
            .map(|i| {
                let image = &input.output().data[i * image_size..(i + 1) * image_size];
                let mut cols = vec![0.0; windows.out_size()];
                windows.map(image, &mut cols);
                let argmax = IndexMap::argmax_groups(&cols, group);
                let mut pooled = vec![0.0; argmax.out_size()];
                argmax.map(&cols, &mut pooled);
                (Tensor::from(pooled), argmax)
            })
            .collect();
        let (pooled, argmax): (Vec<Tensor>, Vec<IndexMap>) = samples.into_iter().unzip();

        Arc::new(MaxPoolRes {
            output: Tensor::concat(&pooled),
            input,
            windows,
            argmax,
            propagated: AtomicBool::new(false),
        })
    }

    fn as_serializer(&self) -> Option<&dyn Serializer> {
        Some(self)
    }
}

impl Serializer for MaxPool {
    fn serializer_type(&self) -> &'static str {
        Self::SERIALIZER_TYPE
    }

    fn serialize(&self) -> Result<Vec<u8>, SerializeError> {
        let fields = [
            self.span_x,
            self.span_y,
            self.input_width,
            self.input_height,
            self.input_depth,
            self.stride_x,
            self.stride_y,
        ]
        .map(|v| v as u64);
        serialize_fields(&fields[..])
    }
}

struct MaxPoolRes {
    input: Arc<dyn Res>,
    windows: Arc<IndexMap>,
    // One per sample, in batch order.
    argmax: Vec<IndexMap>,
    output: Tensor,
    propagated: AtomicBool,
}

impl Res for MaxPoolRes {
    fn output(&self) -> &Tensor {
        &self.output
    }

    fn vars(&self) -> VarSet {
        self.input.vars()
    }

    fn propagate(&self, upstream: Tensor, grad: &mut Grad) {
        assert!(
            !self.propagated.swap(true, Ordering::SeqCst),
            "MaxPool result propagated twice"
        );
        assert_eq!(
            upstream.len(),
            self.output.len(),
            "upstream length mismatch"
        );
        let out_size = self.argmax.first().map_or(0, IndexMap::out_size);
        let pieces: Vec<Tensor> = self
            .argmax
            .par_iter()
            .enumerate()
            .map(|(i, argmax)| {
                let up = &upstream.data[i * out_size..(i + 1) * out_size];
                let mut cols = vec![0.0; argmax.in_size()];
                argmax.map_transpose(up, &mut cols);
                let mut image = Tensor::zeros(self.windows.in_size());
                self.windows.map_transpose(&cols, &mut image.data);
                image
            })
            .collect();
        self.input.propagate(Tensor::concat(&pieces), grad);
    }
}
