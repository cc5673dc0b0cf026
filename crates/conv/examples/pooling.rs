//! Max Pooling as Two Index Maps
//!
//! Run with: cargo run -p seqnet-conv --example pooling
//!
//! This example demonstrates:
//! - The window-extraction map for a small image
//! - Pooling forward and the argmax routing of gradients
//! - Overlapping windows accumulating gradient
//! - Persisting a pool and loading one from JSON
//!
//! Key insight: pooling is gather ; gather, so its gradient is
//! scatter ; scatter in the opposite order.

use std::sync::Arc;

use seqnet_conv::{window_map, MaxPool, MaxPoolConfig};
use seqnet_core::{Serializer, Tensor};
use seqnet_diff::{Grad, Layer, Var, VarRes};

fn print_image(label: &str, data: &[f32], width: usize) {
    println!("  {}:", label);
    for row in data.chunks(width) {
        let cells: Vec<String> = row.iter().map(|v| format!("{:5.1}", v)).collect();
        println!("    {}", cells.join(" "));
    }
}

fn main() {
    println!("=== Max Pooling as Two Index Maps ===\n");

    // -------------------------------------------------------------------------
    // 1. Window extraction
    // -------------------------------------------------------------------------
    println!("1. Window extraction");
    println!("--------------------");
    let pool = MaxPool::new(2, 2, 4, 4, 1);
    let windows = window_map(&pool.geometry());
    for (i, window) in windows.table().chunks(4).enumerate() {
        println!("  window {}: reads {:?}", i, window);
    }
    println!();

    // -------------------------------------------------------------------------
    // 2. Forward and backward
    // -------------------------------------------------------------------------
    println!("2. Forward and backward");
    println!("-----------------------");
    let image = Var::new(Tensor::from((1..=16).map(|v| v as f32).collect::<Vec<_>>()));
    print_image("input", &image.snapshot().data, 4);

    let out = pool.apply(Arc::new(VarRes::new(&image)), 1);
    print_image("pooled", &out.output().data, pool.output_width());

    let mut grad = Grad::new(&out.vars());
    out.propagate(Tensor::full(4, 1.0), &mut grad);
    if let Some(g) = grad.get(&image) {
        print_image("input gradient", &g.data, 4);
    }
    println!();

    // -------------------------------------------------------------------------
    // 3. Overlapping windows
    // -------------------------------------------------------------------------
    println!("3. Overlapping windows (span 2, stride 1)");
    println!("-----------------------------------------");
    let overlapping = MaxPool::with_stride(2, 2, 1, 1, 3, 3, 1);
    let image = Var::new(Tensor::from(vec![1.0, 2.0, 1.0, 2.0, 9.0, 2.0, 1.0, 2.0, 1.0]));
    let out = overlapping.apply(Arc::new(VarRes::new(&image)), 1);
    print_image("pooled", &out.output().data, overlapping.output_width());

    let mut grad = Grad::new(&out.vars());
    out.propagate(Tensor::full(4, 1.0), &mut grad);
    if let Some(g) = grad.get(&image) {
        print_image("input gradient (centre wins all four windows)", &g.data, 3);
    }
    println!();

    // -------------------------------------------------------------------------
    // 4. Persistence and configuration
    // -------------------------------------------------------------------------
    println!("4. Persistence and configuration");
    println!("--------------------------------");
    match pool.serialize() {
        Ok(bytes) => println!("  serialized {} as {} bytes", pool.serializer_type(), bytes.len()),
        Err(err) => println!("  serialize failed: {}", err),
    }

    let json = r#"{"span_x": 3, "span_y": 3, "stride_x": 2, "stride_y": 2,
                   "input_width": 9, "input_height": 9, "input_depth": 3}"#;
    match MaxPoolConfig::from_json(json) {
        Ok(config) => {
            let pool = MaxPool::from(config);
            println!(
                "  from JSON: {}x{}x{} output",
                pool.output_width(),
                pool.output_height(),
                pool.output_depth()
            );
        }
        Err(err) => println!("  bad config: {}", err),
    }
    println!();

    println!("=== Summary ===");
    println!("  Forward:  image -> windows -> maxima");
    println!("  Backward: maxima grad -> window slots -> image positions");
}
