//! Batch composition.
//!
//! Packs a cluster of protein records into uniformly padded tensors plus masks:
//!
//! - alignment tensors over a flat focus axis (`[B, A, F]`), padded on the
//!   alignment and focus axes;
//! - TERM-major views (`[B, T, L_t]`) built with [`RaggedTerms::pad_to`];
//! - filler-extended TERM lengths whose sums equal the padded focus width;
//! - backbone coordinates padded with NaN and converted to a residue mask;
//! - the TERM co-membership graph over residues.
use crate::alphabet::GAP_INDEX;
use crate::cluster::cluster;
use crate::config::BatchConfig;
use crate::error::{Result, TerminatorError};
use crate::graph::{term_graph, TERM_GRAPH_EDGE_FEATURES};
use crate::ragged::{extend_term_lens, pad_terms, RaggedTerms};
use crate::record::{DatasetVariant, ProteinRecord, BACKBONE_ATOMS};
use crate::store::FeatureStore;
use candle_core::{DType, Device, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::path::Path;

/// Auxiliary statistics laid out TERM-major.
#[derive(Debug, Clone)]
pub struct AuxStats {
    /// `[B, T, L_t, n_ppoe]`
    pub ppoe: Tensor,
    /// `[B, T, L_t, n_sing]`
    pub sing_stats: Tensor,
    /// `[B, T, L_t, L_t, n_pair]`
    pub pair_stats: Tensor,
}

#[derive(Debug, Clone)]
pub struct TermBatch {
    pub ids: Vec<String>,
    /// `[B, A, F]` alignment identities, gap padded.
    pub msas: Tensor,
    /// `[B, A]` 1 for real alignments.
    pub msa_mask: Tensor,
    /// `[B, A, F, n_features]`
    pub features: Tensor,
    /// `[B, F]` residue index of each focus position.
    pub focuses: Tensor,
    /// `[B, F]` 1 for real focus positions.
    pub focus_mask: Tensor,
    pub focus_lens: Vec<usize>,
    pub seq_lens: Vec<usize>,
    /// Filler-extended TERM lengths; each row sums to `F`.
    pub term_lens: Vec<Vec<usize>>,
    /// `[B, max TERM count]` extended lengths as i64, padded with -1.
    pub term_lens_padded: Tensor,
    /// `[B, T, L_t]` residue index of each TERM slot.
    pub term_focuses: Tensor,
    /// `[B, T, L_t]` 1 for real TERM slots.
    pub term_mask: Tensor,
    pub aux: Option<AuxStats>,
    /// `[B, L, 4, 3]` backbone coordinates, missing atoms zeroed.
    pub x: Tensor,
    /// `[B, L]` 1 where all backbone atoms are present.
    pub x_mask: Tensor,
    /// `[B, L]`
    pub seqs: Tensor,
    /// `[B, L, K]`
    pub term_graph_idx: Tensor,
    /// `[B, L, K]`
    pub term_graph_mask: Tensor,
    /// `[B, L, K, TERM_GRAPH_EDGE_FEATURES]`
    pub term_graph_features: Tensor,
    pub chain_lens: Vec<Vec<usize>>,
}

impl TermBatch {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn variant(&self) -> DatasetVariant {
        match self.aux {
            Some(_) => DatasetVariant::WithAuxStats,
            None => DatasetVariant::WithoutAuxStats,
        }
    }

    pub fn device(&self) -> &Device {
        self.msas.device()
    }
}

/// Pad backbone coordinates with NaN, derive the residue mask from the NaN
/// pattern, then zero the NaNs.
///
/// Returns `[B, L_max, 4, 3]` coordinates and a `[B, L_max]` mask.
pub fn featurize_coords(coords: &[Vec<f32>], device: &Device) -> Result<(Tensor, Tensor)> {
    let per_residue = BACKBONE_ATOMS * 3;
    let n_batch = coords.len();
    let l_max = coords.iter().map(|c| c.len() / per_residue).max().unwrap_or(0);
    let mut x = Vec::with_capacity(n_batch * l_max * per_residue);
    for c in coords {
        x.extend_from_slice(c);
        x.resize(x.len() + l_max * per_residue - c.len(), f32::NAN);
    }
    let mask: Vec<f32> = x
        .chunks(per_residue)
        .map(|res| {
            if res.iter().all(|v| v.is_finite()) {
                1.0
            } else {
                0.0
            }
        })
        .collect();
    x.iter_mut().filter(|v| v.is_nan()).for_each(|v| *v = 0.0);
    let x = Tensor::from_vec(x, (n_batch, l_max, BACKBONE_ATOMS, 3), device)?;
    let mask = Tensor::from_vec(mask, (n_batch, l_max), device)?;
    Ok((x, mask))
}

/// Independent random streams derived from one seed.
#[derive(Debug, Clone, Copy)]
#[repr(u64)]
enum RngStream {
    Cluster = 0,
    BatchShuffle = 0x9e37_79b9_7f4a_7c15,
}

#[derive(Debug, Clone)]
pub struct BatchComposer {
    config: BatchConfig,
    device: Device,
}

impl BatchComposer {
    /// Fails on conflicting options before any batching work happens.
    pub fn new(config: BatchConfig, device: Device) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, device })
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    fn rng(&self, epoch: u64, stream: RngStream) -> StdRng {
        StdRng::seed_from_u64(self.config.seed.wrapping_add(epoch) ^ stream as u64)
    }

    /// Index the feature store at `dir`, skipping proteins shorter than the
    /// configured `min_protein_len`.
    pub fn open_store(
        &self,
        dir: impl AsRef<Path>,
        ids: Option<&[String]>,
    ) -> Result<FeatureStore> {
        FeatureStore::open(dir, ids, self.config.min_protein_len)
    }

    /// Fresh partition of records, given by their focus lengths, for one pass.
    pub fn partition(&self, lengths: &[usize], epoch: u64) -> Vec<Vec<usize>> {
        let clusters = cluster(lengths, &self.config, &mut self.rng(epoch, RngStream::Cluster));
        if clusters.is_empty() && !lengths.is_empty() {
            tracing::warn!(epoch, records = lengths.len(), "clustering dropped every record");
        }
        clusters
    }

    /// Fresh partition of `records` for one pass over the data.
    pub fn epoch(&self, records: &[ProteinRecord], epoch: u64) -> Vec<Vec<usize>> {
        let lengths: Vec<usize> = records.iter().map(|r| r.focus_len()).collect();
        self.partition(&lengths, epoch)
    }

    /// Packaged batches for one pass.
    pub fn batches<'a>(
        &'a self,
        records: &'a [ProteinRecord],
        epoch: u64,
    ) -> impl Iterator<Item = Result<TermBatch>> + 'a {
        if records.is_empty() {
            tracing::warn!(epoch, "no records to batch");
        }
        let mut rng = self.rng(epoch, RngStream::BatchShuffle);
        self.epoch(records, epoch).into_iter().map(move |idx| {
            let members: Vec<&ProteinRecord> = idx.iter().map(|&i| &records[i]).collect();
            self.package_with(&members, &mut rng)
        })
    }

    /// Packaged batches for one pass over a feature store. Clustering uses
    /// the sidecar lengths; records are read only when their batch is built.
    pub fn batches_from_store<'a>(
        &'a self,
        store: &'a FeatureStore,
        epoch: u64,
    ) -> impl Iterator<Item = Result<TermBatch>> + 'a {
        if store.is_empty() {
            tracing::warn!(epoch, dir = %store.dir().display(), "no records to batch");
        }
        let mut rng = self.rng(epoch, RngStream::BatchShuffle);
        self.partition(&store.focus_lengths(), epoch)
            .into_iter()
            .map(move |idx| {
                let records = idx
                    .iter()
                    .map(|&i| store.load(i))
                    .collect::<Result<Vec<_>>>()?;
                let members: Vec<&ProteinRecord> = records.iter().collect();
                self.package_with(&members, &mut rng)
            })
    }

    /// Package records into one batch, shuffling their order first when
    /// `batch_shuffle` is set.
    pub fn package_with<R: Rng + ?Sized>(
        &self,
        records: &[&ProteinRecord],
        rng: &mut R,
    ) -> Result<TermBatch> {
        let mut members = records.to_vec();
        if self.config.batch_shuffle {
            members.shuffle(rng);
        }
        self.package(&members)
    }

    /// Package records into one batch in the given order.
    pub fn package(&self, records: &[&ProteinRecord]) -> Result<TermBatch> {
        if records.is_empty() {
            tracing::warn!("refusing to package an empty batch");
            return Err(TerminatorError::EmptyBatch(
                "batch has no records; check filtering thresholds".to_string(),
            ));
        }
        for record in records {
            record.validate()?;
        }
        let variant = records[0].variant()?;
        if let Some(odd) = records.iter().find(|r| r.variant().ok() != Some(variant)) {
            return Err(TerminatorError::malformed(
                &odd.pdb,
                "auxiliary statistics present for only part of the batch",
            ));
        }
        let n_features = records[0].num_features();
        if let Some(odd) = records.iter().find(|r| r.num_features() != n_features) {
            return Err(TerminatorError::malformed(&odd.pdb, "feature width differs from batch"));
        }

        let device = &self.device;
        let n_batch = records.len();
        let focus_lens: Vec<usize> = records.iter().map(|r| r.focus_len()).collect();
        let seq_lens: Vec<usize> = records.iter().map(|r| r.seq_len()).collect();
        let f_max = focus_lens.iter().copied().max().unwrap_or(0);
        let a_max = records.iter().map(|r| r.num_alignments()).max().unwrap_or(0);
        let l_max = seq_lens.iter().copied().max().unwrap_or(0);
        let batch_max_term = records
            .iter()
            .flat_map(|r| r.term_lens.iter().copied())
            .max()
            .unwrap_or(1);

        // alignments over the flat focus axis
        let mut msas = Vec::with_capacity(n_batch * a_max * f_max);
        let mut msa_mask = Vec::with_capacity(n_batch * a_max);
        let mut features = Vec::with_capacity(n_batch * a_max * f_max * n_features);
        for record in records {
            for a in 0..a_max {
                match (record.msas.get(a), record.features.get(a)) {
                    (Some(row), Some(feats)) => {
                        msas.extend_from_slice(row);
                        msas.extend(std::iter::repeat(GAP_INDEX).take(f_max - row.len()));
                        feats.iter().for_each(|f| features.extend_from_slice(f));
                        let missing = (f_max - feats.len()) * n_features;
                        features.extend(std::iter::repeat(0f32).take(missing));
                        msa_mask.push(1f32);
                    }
                    _ => {
                        msas.extend(std::iter::repeat(GAP_INDEX).take(f_max));
                        features.extend(std::iter::repeat(0f32).take(f_max * n_features));
                        msa_mask.push(0f32);
                    }
                }
            }
        }
        let msas = Tensor::from_vec(msas, (n_batch, a_max, f_max), device)?;
        let msa_mask = Tensor::from_vec(msa_mask, (n_batch, a_max), device)?;
        let features = Tensor::from_vec(features, (n_batch, a_max, f_max, n_features), device)?;

        // focus positions and their mask, from the true focus counts
        let mut focuses = Vec::with_capacity(n_batch * f_max);
        let mut focus_mask = Vec::with_capacity(n_batch * f_max);
        for record in records {
            focuses.extend(record.focuses.iter().map(|&f| f as u32));
            focuses.extend(std::iter::repeat(0u32).take(f_max - record.focus_len()));
            focus_mask.extend(std::iter::repeat(1f32).take(record.focus_len()));
            focus_mask.extend(std::iter::repeat(0f32).take(f_max - record.focus_len()));
        }
        let focuses = Tensor::from_vec(focuses, (n_batch, f_max), device)?;
        let focus_mask = Tensor::from_vec(focus_mask, (n_batch, f_max), device)?;

        let term_lens: Vec<Vec<usize>> = records
            .iter()
            .map(|r| extend_term_lens(&r.term_lens, f_max, batch_max_term))
            .collect();
        let n_lens = term_lens.iter().map(|l| l.len()).max().unwrap_or(0);
        let mut lens_padded = Vec::with_capacity(n_batch * n_lens);
        for lens in &term_lens {
            lens_padded.extend(lens.iter().map(|&l| l as i64));
            lens_padded.extend(std::iter::repeat(-1i64).take(n_lens - lens.len()));
        }
        let term_lens_padded = Tensor::from_vec(lens_padded, (n_batch, n_lens), device)?;

        // TERM-major views
        let ragged_focuses = records
            .iter()
            .map(|r| {
                RaggedTerms::new(
                    r.term_lens.clone(),
                    1,
                    r.focuses.iter().map(|&f| f as f32).collect(),
                )
            })
            .collect::<Result<Vec<_>>>()?;
        let (term_focuses, term_mask) = pad_terms(&ragged_focuses, device)?;
        let term_focuses = term_focuses.squeeze(3)?.to_dtype(DType::U32)?;

        let aux = match variant {
            DatasetVariant::WithAuxStats => Some(self.aux_stats(records)?),
            DatasetVariant::WithoutAuxStats => None,
        };

        let coords: Vec<Vec<f32>> = records.iter().map(|r| r.coords_nan()).collect();
        let (x, x_mask) = featurize_coords(&coords, device)?;

        let mut seqs = Vec::with_capacity(n_batch * l_max);
        for record in records {
            seqs.extend_from_slice(&record.sequence);
            seqs.extend(std::iter::repeat(0u32).take(l_max - record.seq_len()));
        }
        let seqs = Tensor::from_vec(seqs, (n_batch, l_max), device)?;

        let (term_graph_idx, term_graph_mask, term_graph_features) =
            self.term_graph_tensors(records, l_max)?;

        tracing::debug!(
            batch = n_batch,
            focus_width = f_max,
            alignments = a_max,
            residues = l_max,
            "packaged batch"
        );

        Ok(TermBatch {
            ids: records.iter().map(|r| r.pdb.clone()).collect(),
            msas,
            msa_mask,
            features,
            focuses,
            focus_mask,
            focus_lens,
            seq_lens,
            term_lens,
            term_lens_padded,
            term_focuses,
            term_mask,
            aux,
            x,
            x_mask,
            seqs,
            term_graph_idx,
            term_graph_mask,
            term_graph_features,
            chain_lens: records.iter().map(|r| r.chain_lens.clone()).collect(),
        })
    }

    fn aux_stats(&self, records: &[&ProteinRecord]) -> Result<AuxStats> {
        let missing = |name: &str, pdb: &str| {
            TerminatorError::MissingAuxStats(format!("{name} absent for {pdb}"))
        };
        let mut ppoe = Vec::with_capacity(records.len());
        let mut sing = Vec::with_capacity(records.len());
        let mut pair = Vec::with_capacity(records.len());
        for r in records {
            let p = r.ppoe.as_ref().ok_or_else(|| missing("ppoe", &r.pdb))?;
            let s = r.sing_stats.as_ref().ok_or_else(|| missing("sing_stats", &r.pdb))?;
            let c = r.pair_stats.as_ref().ok_or_else(|| missing("pair_stats", &r.pdb))?;
            ppoe.push(RaggedTerms::from_rows(r.term_lens.clone(), p)?);
            sing.push(RaggedTerms::from_rows(r.term_lens.clone(), s)?);
            pair.push((r.term_lens.clone(), c));
        }
        let (ppoe, _) = pad_terms(&ppoe, &self.device)?;
        let (sing_stats, _) = pad_terms(&sing, &self.device)?;

        // pair stats pad on both residue axes of each TERM
        let n_terms = records.iter().map(|r| r.term_lens.len()).max().unwrap_or(0);
        let max_len = records
            .iter()
            .flat_map(|r| r.term_lens.iter().copied())
            .max()
            .unwrap_or(0);
        let n_pair = pair
            .iter()
            .flat_map(|(lens, stats)| lens.iter().zip(stats.iter()).map(|(l, s)| s.len() / (l * l)))
            .next()
            .unwrap_or(0);
        let mut dense = vec![0f32; records.len() * n_terms * max_len * max_len * n_pair];
        for (b, (lens, stats)) in pair.iter().enumerate() {
            for (t, (&len, values)) in lens.iter().zip(stats.iter()).enumerate() {
                for i in 0..len {
                    for j in 0..len {
                        let src = (i * len + j) * n_pair;
                        let dst = ((((b * n_terms) + t) * max_len + i) * max_len + j) * n_pair;
                        dense[dst..dst + n_pair].copy_from_slice(&values[src..src + n_pair]);
                    }
                }
            }
        }
        let pair_stats = Tensor::from_vec(
            dense,
            (records.len(), n_terms, max_len, max_len, n_pair),
            &self.device,
        )?;
        Ok(AuxStats {
            ppoe,
            sing_stats,
            pair_stats,
        })
    }

    fn term_graph_tensors(
        &self,
        records: &[&ProteinRecord],
        l_max: usize,
    ) -> Result<(Tensor, Tensor, Tensor)> {
        let k = self.config.term_graph_neighbors;
        let n_batch = records.len();
        let mut idx = Vec::with_capacity(n_batch * l_max * k);
        let mut mask = Vec::with_capacity(n_batch * l_max * k);
        let mut feats = Vec::with_capacity(n_batch * l_max * k * TERM_GRAPH_EDGE_FEATURES);
        for record in records {
            let graph = term_graph(record.seq_len(), &record.term_lens, &record.focuses, k);
            idx.extend(graph.neighbors);
            mask.extend(graph.mask);
            feats.extend(graph.edge_features);
            // padded residues point at themselves
            for i in record.seq_len()..l_max {
                idx.extend(std::iter::repeat(i as u32).take(k));
            }
            let pad = l_max - record.seq_len();
            mask.extend(std::iter::repeat(0f32).take(pad * k));
            feats.extend(std::iter::repeat(0f32).take(pad * k * TERM_GRAPH_EDGE_FEATURES));
        }
        let device = &self.device;
        Ok((
            Tensor::from_vec(idx, (n_batch, l_max, k), device)?,
            Tensor::from_vec(mask, (n_batch, l_max, k), device)?,
            Tensor::from_vec(feats, (n_batch, l_max, k, TERM_GRAPH_EDGE_FEATURES), device)?,
        ))
    }
}
