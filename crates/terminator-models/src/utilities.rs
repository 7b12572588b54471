use candle_core::{DType, Device, Module, Result, Tensor, D};
use candle_nn::encoding::one_hot;
use candle_nn::ops::softmax_last_dim;

/// Apply a module to the last dimension of a tensor of any rank.
pub fn forward_flat<M: Module>(module: &M, x: &Tensor) -> Result<Tensor> {
    let dims = x.dims().to_vec();
    let last = dims[dims.len() - 1];
    let rows = x.elem_count() / last.max(1);
    let out = module.forward(&x.reshape((rows, last))?)?;
    let mut out_dims = dims;
    let n = out_dims.len();
    out_dims[n - 1] = out.dim(1)?;
    out.reshape(out_dims)
}

/// Numerically stable masked softmax over the last dimension.
///
/// Masked logits are replaced by `f32::MIN` and the result is multiplied by the
/// mask, so masked entries are exactly zero and a fully masked row is all zeros.
pub fn masked_softmax(logits: &Tensor, mask: &Tensor) -> Result<Tensor> {
    let mask = mask.to_dtype(logits.dtype())?.broadcast_as(logits.dims())?;
    let negative =
        Tensor::full(f32::MIN, logits.dims(), logits.device())?.to_dtype(logits.dtype())?;
    let logits = mask.gt(0f64)?.where_cond(logits, &negative)?;
    let attend = softmax_last_dim(&logits)?;
    attend * mask
}

/// Features `[B, N, C]` at neighbor indices `[B, N, K]` => `[B, N, K, C]`.
pub fn gather_nodes(nodes: &Tensor, neighbor_idx: &Tensor) -> Result<Tensor> {
    let (batch_size, n_nodes, n_features) = nodes.dims3()?;
    let (_, _, k_neighbors) = neighbor_idx.dims3()?;
    let neighbors_flat = neighbor_idx
        .reshape((batch_size, n_nodes * k_neighbors))?
        .unsqueeze(2)?
        .expand((batch_size, n_nodes * k_neighbors, n_features))?
        .contiguous()?;
    let neighbor_features = nodes.contiguous()?.gather(&neighbors_flat, 1)?;
    neighbor_features.reshape((batch_size, n_nodes, k_neighbors, n_features))
}

/// Concatenate edge features `[B, N, K, C1]` with gathered node features.
pub fn cat_neighbors_nodes(
    h_nodes: &Tensor,
    h_neighbors: &Tensor,
    e_idx: &Tensor,
) -> Result<Tensor> {
    let h_nodes = gather_nodes(h_nodes, e_idx)?;
    Tensor::cat(&[h_neighbors, &h_nodes], D::Minus1)
}

/// Split a flat focus axis `[B, F, H]` into TERMs `[B, T, L_t, H]`.
///
/// Every row of `term_lens` must sum to `F`. Zero-length TERMs and missing
/// trailing TERMs are filled with zeros.
pub fn batchify_terms(flat: &Tensor, term_lens: &[Vec<usize>]) -> Result<Tensor> {
    let (n_batch, width, hidden) = flat.dims3()?;
    if term_lens.len() != n_batch {
        candle_core::bail!("{} term length rows for a batch of {n_batch}", term_lens.len())
    }
    let n_terms = term_lens.iter().map(Vec::len).max().unwrap_or(0);
    let max_len = term_lens.iter().flatten().copied().max().unwrap_or(0);
    let zeros = Tensor::zeros((max_len, hidden), flat.dtype(), flat.device())?;
    let mut proteins = Vec::with_capacity(n_batch);
    for (b, lens) in term_lens.iter().enumerate() {
        let total: usize = lens.iter().sum();
        if total != width {
            candle_core::bail!("term lengths sum to {total} but the focus axis is {width}")
        }
        let protein = flat.get(b)?;
        let mut terms = Vec::with_capacity(n_terms);
        let mut start = 0;
        for &len in lens {
            let term = match len {
                0 => zeros.clone(),
                len if len == max_len => protein.narrow(0, start, len)?,
                len => protein.narrow(0, start, len)?.pad_with_zeros(0, 0, max_len - len)?,
            };
            terms.push(term);
            start += len;
        }
        terms.resize(n_terms, zeros.clone());
        proteins.push(Tensor::stack(&terms, 0)?);
    }
    Tensor::stack(&proteins, 0)
}

/// Inverse of [`batchify_terms`]: `[B, T, L_t, H]` back to `[B, F, H]`.
pub fn unbatchify_terms(terms: &Tensor, term_lens: &[Vec<usize>]) -> Result<Tensor> {
    let mut proteins = Vec::with_capacity(term_lens.len());
    for (b, lens) in term_lens.iter().enumerate() {
        let protein = terms.get(b)?;
        let chunks = lens
            .iter()
            .enumerate()
            .filter(|(_, len)| **len > 0)
            .map(|(t, &len)| protein.get(t)?.narrow(0, 0, len))
            .collect::<Result<Vec<_>>>()?;
        proteins.push(Tensor::cat(&chunks, 0)?);
    }
    Tensor::stack(&proteins, 0)
}

/// Mean of focus embeddings `[B, F, H]` over all TERMs containing each residue.
///
/// Returns `[B, n_residues, H]`; residues without any focus are zero.
pub fn aggregate_focuses(
    flat: &Tensor,
    focuses: &Tensor,
    focus_mask: &Tensor,
    n_residues: usize,
) -> Result<Tensor> {
    let onehot = one_hot(focuses.clone(), n_residues, 1f32, 0f32)?
        .to_dtype(flat.dtype())?
        .broadcast_mul(&focus_mask.to_dtype(flat.dtype())?.unsqueeze(2)?)?;
    let counts = onehot.sum(1)?.maximum(1f32)?;
    let summed = onehot.transpose(1, 2)?.contiguous()?.matmul(&flat.contiguous()?)?;
    summed.broadcast_div(&counts.unsqueeze(2)?)
}

/// `[B, L]` mask with ones below each sequence length.
pub fn length_mask(lens: &[usize], width: usize, device: &Device) -> Result<Tensor> {
    let values: Vec<f32> = lens
        .iter()
        .flat_map(|&len| (0..width).map(move |i| if i < len { 1.0 } else { 0.0 }))
        .collect();
    Tensor::from_vec(values, (lens.len(), width), device)
}

/// Sinusoidal table `[max_len, dim]`, sin and cos interleaved.
pub fn sinusoidal_table(max_len: usize, dim: usize, device: &Device) -> Result<Tensor> {
    let mut table = vec![0f32; max_len * dim];
    for pos in 0..max_len {
        for i in 0..dim / 2 {
            let freq = (-(2.0 * i as f32) * (10000f32.ln() / dim as f32)).exp();
            let angle = pos as f32 * freq;
            table[pos * dim + 2 * i] = angle.sin();
            table[pos * dim + 2 * i + 1] = angle.cos();
        }
    }
    Tensor::from_vec(table, (max_len, dim), device)
}

/// Retrieve the `k` nearest neighbors of each point by euclidean distance.
///
/// Self pairs and pairs involving a masked point are never selected ahead of a
/// valid pair. Slots without a valid neighbor point back at the residue itself.
/// Returns distances, indices and a validity mask, all `[B, N, k]`.
pub fn compute_nearest_neighbors(
    coords: &Tensor,
    mask: &Tensor,
    k: usize,
    eps: f64,
) -> Result<(Tensor, Tensor, Tensor)> {
    let (batch_size, n_points, _) = coords.dims3()?;
    let device = coords.device();
    let k = k.min(n_points);

    let positions = Tensor::arange(0u32, n_points as u32, device)?;
    let not_self = positions
        .unsqueeze(1)?
        .broadcast_ne(&positions.unsqueeze(0)?)?
        .to_dtype(DType::F32)?;
    let valid = mask
        .unsqueeze(2)?
        .broadcast_mul(&mask.unsqueeze(1)?)?
        .broadcast_mul(&not_self.unsqueeze(0)?)?;

    let distances = (coords
        .unsqueeze(2)?
        .broadcast_sub(&coords.unsqueeze(1)?)?
        .sqr()?
        .sum(D::Minus1)?
        + eps)?
        .sqrt()?;
    // push invalid pairs past every valid one
    let d_max = (distances.max_keepdim(D::Minus1)?.max_keepdim(1)? + 1.0)?;
    let adjusted = (distances.mul(&valid)? + valid.affine(-1.0, 1.0)?.broadcast_mul(&d_max)?)?;

    let (d_neighbors, e_idx) = topk_smallest_last_dim(&adjusted, k)?;
    let nn_valid = valid.contiguous()?.gather(&e_idx, D::Minus1)?;
    let self_idx = positions
        .reshape((1, n_points, 1))?
        .broadcast_as((batch_size, n_points, k))?
        .contiguous()?;
    let e_idx = nn_valid.gt(0f64)?.where_cond(&e_idx, &self_idx)?;
    Ok((d_neighbors.mul(&nn_valid)?, e_idx, nn_valid))
}

pub fn topk_smallest_last_dim(xs: &Tensor, topk: usize) -> Result<(Tensor, Tensor)> {
    let sorted_indices = xs.contiguous()?.arg_sort_last_dim(true)?;
    let topk_indices = sorted_indices.narrow(D::Minus1, 0, topk)?.contiguous()?;
    Ok((xs.contiguous()?.gather(&topk_indices, D::Minus1)?, topk_indices))
}

pub fn linspace(start: f64, stop: f64, steps: usize, device: &Device) -> Result<Tensor> {
    if steps == 0 {
        Tensor::from_vec(Vec::<f64>::new(), steps, device)
    } else if steps == 1 {
        Tensor::from_vec(vec![start], steps, device)
    } else {
        let delta = (stop - start) / (steps - 1) as f64;
        let vs = (0..steps)
            .map(|step| start + step as f64 * delta)
            .collect::<Vec<_>>();
        Tensor::from_vec(vs, steps, device)
    }
}

/// Gaussian radial basis expansion of distances, `[...]` => `[..., num_rbf]`.
pub fn rbf(distances: &Tensor, num_rbf: usize) -> Result<Tensor> {
    let (d_min, d_max) = (2.0, 22.0);
    let sigma = (d_max - d_min) / num_rbf as f64;
    let centers = linspace(d_min, d_max, num_rbf, distances.device())?.to_dtype(distances.dtype())?;
    let mut shape = distances.dims().to_vec();
    shape.push(1);
    let centers = centers.reshape(
        std::iter::repeat(1)
            .take(shape.len() - 1)
            .chain(std::iter::once(num_rbf))
            .collect::<Vec<_>>(),
    )?;
    let z = (distances.reshape(shape)?.broadcast_sub(&centers)? / sigma)?;
    z.sqr()?.neg()?.exp()
}
