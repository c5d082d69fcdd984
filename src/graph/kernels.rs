//! Reference CPU kernels for the built-in op types
//!
//! Straightforward loops over `ndarray` views; these are the float reference
//! the simulation is compared against, not a performance path.

use ndarray::{ArrayD, ArrayView2, ArrayView4, Array2, Array4, Ix2, Ix4, IxDyn, Zip};

use super::Node;
use crate::error::{Error, Result};

fn operand<'a>(node: &Node, inputs: &[&'a ArrayD<f32>], index: usize) -> Result<&'a ArrayD<f32>> {
    inputs.get(index).copied().ok_or_else(|| {
        Error::Graph(format!(
            "node '{}' ({}) expects at least {} inputs, got {}",
            node.name,
            node.op_type,
            index + 1,
            inputs.len()
        ))
    })
}

fn as_4d<'a>(array: &'a ArrayD<f32>) -> Result<ArrayView4<'a, f32>> {
    array.view().into_dimensionality::<Ix4>().map_err(|_| Error::ShapeMismatch {
        expected: vec![0; 4],
        actual: array.shape().to_vec(),
    })
}

fn as_2d<'a>(array: &'a ArrayD<f32>) -> Result<ArrayView2<'a, f32>> {
    array.view().into_dimensionality::<Ix2>().map_err(|_| Error::ShapeMismatch {
        expected: vec![0; 2],
        actual: array.shape().to_vec(),
    })
}

/// Two-element spatial attribute (strides, dilations)
fn spatial_pair(node: &Node, key: &str, default: usize) -> Result<[usize; 2]> {
    match node.attr_ints(key) {
        None => Ok([default, default]),
        Some([a, b]) if *a > 0 && *b > 0 => Ok([*a as usize, *b as usize]),
        Some(other) => Err(Error::Graph(format!(
            "node '{}': attribute '{key}' must hold two positive values, got {other:?}",
            node.name
        ))),
    }
}

/// Pads as `[top, left, bottom, right]`
fn pads(node: &Node) -> Result<[usize; 4]> {
    match node.attr_ints("pads") {
        None => Ok([0; 4]),
        Some([t, l, b, r]) if [*t, *l, *b, *r].iter().all(|p| *p >= 0) => {
            Ok([*t as usize, *l as usize, *b as usize, *r as usize])
        }
        Some(other) => Err(Error::Graph(format!(
            "node '{}': pads must hold four non-negative values, got {other:?}",
            node.name
        ))),
    }
}

fn bias_vector(node: &Node, inputs: &[&ArrayD<f32>], index: usize, channels: usize) -> Result<Vec<f32>> {
    match inputs.get(index) {
        None => Ok(vec![0.0; channels]),
        Some(bias) if bias.len() == channels => Ok(bias.iter().copied().collect()),
        Some(bias) => Err(Error::Graph(format!(
            "node '{}': bias has {} elements, expected {channels}",
            node.name,
            bias.len()
        ))),
    }
}

/// 2-D convolution over NCHW input with grouped channels
pub(super) fn conv(node: &Node, inputs: &[&ArrayD<f32>]) -> Result<Vec<ArrayD<f32>>> {
    let x = as_4d(operand(node, inputs, 0)?)?;
    let w = as_4d(operand(node, inputs, 1)?)?;
    let (batch, channels, height, width) = x.dim();
    let (out_channels, group_channels, kh, kw) = w.dim();

    let group = node.attr_int("group").unwrap_or(1).max(1) as usize;
    if channels != group_channels * group || out_channels % group != 0 {
        return Err(Error::ShapeMismatch {
            expected: vec![batch, group_channels * group, height, width],
            actual: x.shape().to_vec(),
        });
    }
    let [sh, sw] = spatial_pair(node, "strides", 1)?;
    let [dh, dw] = spatial_pair(node, "dilations", 1)?;
    let [pt, pl, pb, pr] = pads(node)?;
    let bias = bias_vector(node, inputs, 2, out_channels)?;

    let span_h = dh * (kh - 1) + 1;
    let span_w = dw * (kw - 1) + 1;
    if height + pt + pb < span_h || width + pl + pr < span_w {
        return Err(Error::Graph(format!("node '{}': kernel larger than padded input", node.name)));
    }
    let out_h = (height + pt + pb - span_h) / sh + 1;
    let out_w = (width + pl + pr - span_w) / sw + 1;
    let per_group = out_channels / group;

    let mut out = Array4::<f32>::zeros((batch, out_channels, out_h, out_w));
    for b in 0..batch {
        for oc in 0..out_channels {
            let g = oc / per_group;
            for oy in 0..out_h {
                for ox in 0..out_w {
                    let mut acc = bias[oc];
                    for ic in 0..group_channels {
                        let cin = g * group_channels + ic;
                        for ky in 0..kh {
                            let iy = (oy * sh + ky * dh) as isize - pt as isize;
                            if iy < 0 || iy >= height as isize {
                                continue;
                            }
                            for kx in 0..kw {
                                let ix = (ox * sw + kx * dw) as isize - pl as isize;
                                if ix < 0 || ix >= width as isize {
                                    continue;
                                }
                                acc += x[[b, cin, iy as usize, ix as usize]] * w[[oc, ic, ky, kx]];
                            }
                        }
                    }
                    out[[b, oc, oy, ox]] = acc;
                }
            }
        }
    }
    Ok(vec![out.into_dyn()])
}

/// Transposed 2-D convolution; weight layout is `[C_in, C_out, kH, kW]`
pub(super) fn conv_transpose(node: &Node, inputs: &[&ArrayD<f32>]) -> Result<Vec<ArrayD<f32>>> {
    let x = as_4d(operand(node, inputs, 0)?)?;
    let w = as_4d(operand(node, inputs, 1)?)?;
    let (batch, channels, height, width) = x.dim();
    let (w_in, out_channels, kh, kw) = w.dim();

    if node.attr_int("group").unwrap_or(1) != 1 {
        return Err(Error::Graph(format!(
            "node '{}': grouped ConvTranspose is not supported",
            node.name
        )));
    }
    if channels != w_in {
        return Err(Error::ShapeMismatch {
            expected: vec![batch, w_in, height, width],
            actual: x.shape().to_vec(),
        });
    }
    let [sh, sw] = spatial_pair(node, "strides", 1)?;
    let [dh, dw] = spatial_pair(node, "dilations", 1)?;
    let [pt, pl, pb, pr] = pads(node)?;
    let bias = bias_vector(node, inputs, 2, out_channels)?;

    let full_h = (height - 1) * sh + dh * (kh - 1) + 1;
    let full_w = (width - 1) * sw + dw * (kw - 1) + 1;
    if full_h <= pt + pb || full_w <= pl + pr {
        return Err(Error::Graph(format!("node '{}': padding removes the whole output", node.name)));
    }
    let out_h = full_h - pt - pb;
    let out_w = full_w - pl - pr;

    let mut out = Array4::<f32>::zeros((batch, out_channels, out_h, out_w));
    for b in 0..batch {
        for (oc, &bv) in bias.iter().enumerate() {
            out.slice_mut(ndarray::s![b, oc, .., ..]).fill(bv);
        }
        for ic in 0..channels {
            for iy in 0..height {
                for ix in 0..width {
                    let v = x[[b, ic, iy, ix]];
                    for oc in 0..out_channels {
                        for ky in 0..kh {
                            let oy = (iy * sh + ky * dh) as isize - pt as isize;
                            if oy < 0 || oy >= out_h as isize {
                                continue;
                            }
                            for kx in 0..kw {
                                let ox = (ix * sw + kx * dw) as isize - pl as isize;
                                if ox < 0 || ox >= out_w as isize {
                                    continue;
                                }
                                out[[b, oc, oy as usize, ox as usize]] += v * w[[ic, oc, ky, kx]];
                            }
                        }
                    }
                }
            }
        }
    }
    Ok(vec![out.into_dyn()])
}

/// `alpha * A' x B' + beta * C` with optional transposes
pub(super) fn gemm(node: &Node, inputs: &[&ArrayD<f32>]) -> Result<Vec<ArrayD<f32>>> {
    let a = as_2d(operand(node, inputs, 0)?)?;
    let b = as_2d(operand(node, inputs, 1)?)?;
    let a = if node.attr_int("transA").unwrap_or(0) != 0 { a.reversed_axes() } else { a };
    let b = if node.attr_int("transB").unwrap_or(0) != 0 { b.reversed_axes() } else { b };
    if a.ncols() != b.nrows() {
        return Err(Error::ShapeMismatch {
            expected: vec![a.ncols(), b.ncols()],
            actual: vec![b.nrows(), b.ncols()],
        });
    }

    let alpha = node.attr_float("alpha").unwrap_or(1.0);
    let beta = node.attr_float("beta").unwrap_or(1.0);
    let mut y: ArrayD<f32> = (a.dot(&b) * alpha).into_dyn();

    if let Some(c) = inputs.get(2) {
        let shape = y.shape().to_vec();
        let c = c.broadcast(IxDyn(&shape)).ok_or_else(|| Error::ShapeMismatch {
            expected: shape.clone(),
            actual: c.shape().to_vec(),
        })?;
        y.zip_mut_with(&c, |acc, &cv| *acc += beta * cv);
    }
    Ok(vec![y])
}

/// Matrix product of an N-D left operand with a 2-D right operand
pub(super) fn matmul(node: &Node, inputs: &[&ArrayD<f32>]) -> Result<Vec<ArrayD<f32>>> {
    let lhs = operand(node, inputs, 0)?;
    let rhs = as_2d(operand(node, inputs, 1)?)?;
    let rank = lhs.ndim();
    if rank < 2 || lhs.shape()[rank - 1] != rhs.nrows() {
        return Err(Error::ShapeMismatch {
            expected: vec![rhs.nrows()],
            actual: lhs.shape().to_vec(),
        });
    }

    let inner = rhs.nrows();
    let rows = lhs.len() / inner.max(1);
    let lhs2: Array2<f32> = lhs
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((rows, inner))
        .map_err(|e| Error::Graph(format!("node '{}': {e}", node.name)))?;

    let mut dims = lhs.shape()[..rank - 1].to_vec();
    dims.push(rhs.ncols());
    let product = lhs2
        .dot(&rhs)
        .into_shape_with_order(IxDyn(&dims))
        .map_err(|e| Error::Graph(format!("node '{}': {e}", node.name)))?;
    Ok(vec![product])
}

/// Numpy-style broadcast of two shapes
fn broadcast_shape(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let rank = a.len().max(b.len());
    let dim = |shape: &[usize], i: usize| {
        let lead = rank - shape.len();
        if i < lead {
            1
        } else {
            shape[i - lead]
        }
    };
    (0..rank)
        .map(|i| match (dim(a, i), dim(b, i)) {
            (x, y) if x == y => Some(x),
            (1, y) => Some(y),
            (x, 1) => Some(x),
            _ => None,
        })
        .collect()
}

fn elementwise(node: &Node, inputs: &[&ArrayD<f32>], f: fn(f32, f32) -> f32) -> Result<Vec<ArrayD<f32>>> {
    let a = operand(node, inputs, 0)?;
    let b = operand(node, inputs, 1)?;
    let shape = broadcast_shape(a.shape(), b.shape()).ok_or_else(|| Error::ShapeMismatch {
        expected: a.shape().to_vec(),
        actual: b.shape().to_vec(),
    })?;
    let (av, bv) = match (a.broadcast(IxDyn(&shape)), b.broadcast(IxDyn(&shape))) {
        (Some(av), Some(bv)) => (av, bv),
        _ => {
            return Err(Error::ShapeMismatch { expected: shape, actual: b.shape().to_vec() });
        }
    };
    Ok(vec![Zip::from(&av).and(&bv).map_collect(|&x, &y| f(x, y))])
}

pub(super) fn add(node: &Node, inputs: &[&ArrayD<f32>]) -> Result<Vec<ArrayD<f32>>> {
    elementwise(node, inputs, |x, y| x + y)
}

pub(super) fn mul(node: &Node, inputs: &[&ArrayD<f32>]) -> Result<Vec<ArrayD<f32>>> {
    elementwise(node, inputs, |x, y| x * y)
}

pub(super) fn relu(node: &Node, inputs: &[&ArrayD<f32>]) -> Result<Vec<ArrayD<f32>>> {
    Ok(vec![operand(node, inputs, 0)?.mapv(|v| v.max(0.0))])
}

/// Collapse to 2-D around `axis` (default 1)
pub(super) fn flatten(node: &Node, inputs: &[&ArrayD<f32>]) -> Result<Vec<ArrayD<f32>>> {
    let x = operand(node, inputs, 0)?;
    let rank = x.ndim() as i64;
    let axis = node.attr_int("axis").unwrap_or(1);
    let axis = if axis < 0 { axis + rank } else { axis };
    if !(0..=rank).contains(&axis) {
        return Err(Error::Graph(format!("node '{}': flatten axis {axis} out of range", node.name)));
    }
    let axis = axis as usize;
    let outer: usize = x.shape()[..axis].iter().product();
    let inner: usize = x.shape()[axis..].iter().product();
    let flat = x
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order(IxDyn(&[outer, inner]))
        .map_err(|e| Error::Graph(format!("node '{}': {e}", node.name)))?;
    Ok(vec![flat])
}

pub(super) fn identity(node: &Node, inputs: &[&ArrayD<f32>]) -> Result<Vec<ArrayD<f32>>> {
    Ok(vec![operand(node, inputs, 0)?.clone()])
}

/// Emits the tensor stored in the `value` attribute
pub(super) fn constant(node: &Node, _inputs: &[&ArrayD<f32>]) -> Result<Vec<ArrayD<f32>>> {
    match node.attributes.get("value") {
        Some(super::AttrValue::Tensor(record)) => Ok(vec![record.to_array()?]),
        _ => Err(Error::Graph(format!("node '{}': Constant needs a tensor 'value'", node.name))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2, Array};

    fn node(op: &str) -> Node {
        Node::new("n", op)
    }

    #[test]
    fn test_broadcast_shape_rules() {
        assert_eq!(broadcast_shape(&[2, 3], &[3]), Some(vec![2, 3]));
        assert_eq!(broadcast_shape(&[1, 4, 1], &[2, 1, 5]), Some(vec![2, 4, 5]));
        assert_eq!(broadcast_shape(&[2, 3], &[4]), None);
    }

    #[test]
    fn test_conv_identity_kernel() {
        let x = Array::from_shape_fn(IxDyn(&[1, 1, 3, 3]), |d| (d[2] * 3 + d[3]) as f32);
        let w = Array::from_shape_vec(IxDyn(&[1, 1, 1, 1]), vec![2.0]).unwrap();
        let b = arr1(&[0.5]).into_dyn();
        let out = conv(&node("Conv"), &[&x, &w, &b]).unwrap();
        assert_eq!(out[0].shape(), &[1, 1, 3, 3]);
        assert_abs_diff_eq!(out[0][[0, 0, 1, 1]], 4.0 * 2.0 + 0.5);
    }

    #[test]
    fn test_conv_padding_and_stride() {
        let x = Array::ones(IxDyn(&[2, 3, 8, 8]));
        let w = Array::ones(IxDyn(&[4, 3, 3, 3]));
        let n = node("Conv")
            .with_attr("pads", crate::graph::AttrValue::Ints(vec![1, 1, 1, 1]))
            .with_attr("strides", crate::graph::AttrValue::Ints(vec![2, 2]));
        let out = conv(&n, &[&x, &w]).unwrap();
        assert_eq!(out[0].shape(), &[2, 4, 4, 4]);
        // interior window covers 27 ones
        assert_abs_diff_eq!(out[0][[0, 0, 1, 1]], 27.0);
    }

    #[test]
    fn test_conv_rejects_channel_mismatch() {
        let x = Array::ones(IxDyn(&[1, 2, 4, 4]));
        let w = Array::ones(IxDyn(&[1, 3, 1, 1]));
        assert!(matches!(conv(&node("Conv"), &[&x, &w]), Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_conv_transpose_upsamples() {
        let x = Array::ones(IxDyn(&[1, 2, 2, 2]));
        let w = Array::ones(IxDyn(&[2, 3, 2, 2]));
        let n = node("ConvTranspose").with_attr("strides", crate::graph::AttrValue::Ints(vec![2, 2]));
        let out = conv_transpose(&n, &[&x, &w]).unwrap();
        assert_eq!(out[0].shape(), &[1, 3, 4, 4]);
        assert_abs_diff_eq!(out[0][[0, 1, 3, 3]], 2.0);
    }

    #[test]
    fn test_gemm_trans_b_with_bias() {
        let a = arr2(&[[1.0, 2.0]]).into_dyn();
        let b = arr2(&[[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]]).into_dyn();
        let c = arr1(&[0.0, 0.0, 10.0]).into_dyn();
        let n = node("Gemm").with_attr("transB", crate::graph::AttrValue::Int(1));
        let out = gemm(&n, &[&a, &b, &c]).unwrap();
        assert_eq!(out[0].shape(), &[1, 3]);
        assert_abs_diff_eq!(out[0][[0, 2]], 13.0);
    }

    #[test]
    fn test_matmul_batched_lhs() {
        let lhs = Array::ones(IxDyn(&[2, 3, 4]));
        let rhs = Array::ones(IxDyn(&[4, 5]));
        let out = matmul(&node("MatMul"), &[&lhs, &rhs]).unwrap();
        assert_eq!(out[0].shape(), &[2, 3, 5]);
        assert_abs_diff_eq!(out[0][[1, 2, 4]], 4.0);
    }

    #[test]
    fn test_add_broadcasts_bias() {
        let x = Array::zeros(IxDyn(&[2, 3]));
        let b = arr1(&[1.0, 2.0, 3.0]).into_dyn();
        let out = add(&node("Add"), &[&x, &b]).unwrap();
        assert_abs_diff_eq!(out[0][[1, 2]], 3.0);
    }

    #[test]
    fn test_flatten_default_axis() {
        let x = Array::zeros(IxDyn(&[2, 3, 4, 5]));
        let out = flatten(&node("Flatten"), &[&x]).unwrap();
        assert_eq!(out[0].shape(), &[2, 60]);
    }

    #[test]
    fn test_relu_clamps_negatives() {
        let x = arr1(&[-1.0, 0.5]).into_dyn();
        let out = relu(&node("Relu"), &[&x]).unwrap();
        assert_eq!(out[0].as_slice().unwrap(), &[0.0, 0.5]);
    }
}
