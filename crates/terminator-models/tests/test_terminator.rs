use candle_core::{DType, Device, Result as CandleResult, Tensor};
use candle_nn::{VarBuilder, VarMap};
use terminator_core::{
    Alphabet, BatchComposer, BatchConfig, FeatureStore, ProteinRecord, TermBatch, TerminatorError,
};
use terminator_models::{EnergyHead, SparseEtab, Terminator, TerminatorConfig};
use terminator_test_data::TestDataset;

fn small_config(alphabet: Alphabet) -> TerminatorConfig {
    TerminatorConfig {
        term_hidden_dim: 8,
        term_heads: 2,
        term_layers: 1,
        term_graph_layers: 1,
        k_neighbors: 8,
        energies_hidden_dim: 8,
        ..TerminatorConfig::for_alphabet(alphabet)
    }
}

fn load_records() -> anyhow::Result<Vec<ProteinRecord>> {
    let dir = TestDataset::create_temp()?;
    let store = FeatureStore::open(dir.path(), None, 30)?;
    let (records, _) = store.load_all()?;
    Ok(records)
}

fn compose(records: &[ProteinRecord]) -> anyhow::Result<TermBatch> {
    let config = BatchConfig {
        batch_shuffle: false,
        term_graph_neighbors: 8,
        ..Default::default()
    };
    let composer = BatchComposer::new(config, Device::Cpu)?;
    Ok(composer.package(&records.iter().collect::<Vec<_>>())?)
}

#[test]
fn test_loss_on_feature_batch() -> anyhow::Result<()> {
    let batch = compose(&load_records()?)?;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let model = Terminator::load(vb, &small_config(Alphabet::Canonical))?;

    let (etab, e_idx) = model.potts(&batch, false)?;
    assert_eq!(etab.dims(), &[2, 36, 8, 400]);
    assert_eq!(e_idx.dims(), &[2, 36, 8]);

    let loss = model.forward(&batch, false)?.to_scalar::<f32>()?;
    assert!(loss.is_finite());
    assert!(loss > 0.0);

    let train_loss = model.forward(&batch, true)?.to_scalar::<f32>()?;
    assert!(train_loss.is_finite());
    Ok(())
}

#[test]
fn test_opt_sequence_lengths() -> anyhow::Result<()> {
    let batch = compose(&load_records()?)?;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let model = Terminator::load(vb, &small_config(Alphabet::Extended))?;

    let sequences = model.opt_sequence(&batch, &batch.seqs)?;
    assert_eq!(sequences.len(), 2);
    assert_eq!(sequences[0].len(), 32);
    assert_eq!(sequences[1].len(), 36);
    assert!(sequences
        .iter()
        .flat_map(|s| s.chars())
        .all(|c| c.is_ascii_alphabetic() || c == '-'));

    // a 22 letter table has no pseudo-likelihood over the canonical alphabet
    let err = model.forward(&batch, false).unwrap_err();
    assert!(matches!(err, TerminatorError::AlphabetMismatch { expected: 20, found: 22 }));
    Ok(())
}

#[test]
fn test_canonical_table_cannot_decode() -> anyhow::Result<()> {
    let batch = compose(&load_records()?)?;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let model = Terminator::load(vb, &small_config(Alphabet::Canonical))?;
    let err = model.opt_sequence(&batch, &batch.seqs).unwrap_err();
    assert!(matches!(err, TerminatorError::AlphabetMismatch { expected: 22, found: 20 }));
    Ok(())
}

#[derive(Clone, Debug)]
struct FlatHead;

impl EnergyHead for FlatHead {
    fn forward(
        &self,
        nodes: &Tensor,
        _coords: &Tensor,
        _x_mask: &Tensor,
    ) -> CandleResult<(Tensor, Tensor)> {
        let (b, l, _) = nodes.dims3()?;
        let e_idx = Tensor::arange(0u32, l as u32, nodes.device())?
            .reshape((1, l, 1))?
            .broadcast_as((b, l, 1))?
            .contiguous()?;
        let etab = Tensor::zeros((b, l, 1, 400), DType::F32, nodes.device())?;
        Ok((etab, e_idx))
    }
}

#[test]
fn test_custom_head_uniform_loss() -> anyhow::Result<()> {
    let batch = compose(&load_records()?)?;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let model = Terminator::with_head(vb, &small_config(Alphabet::Canonical), FlatHead)?;
    let loss = model.forward(&batch, false)?.to_scalar::<f32>()?;
    assert!((loss - 20f32.ln()).abs() < 1e-5);
    Ok(())
}

#[test]
fn test_sparse_tables_skip_masked_residues() -> anyhow::Result<()> {
    let batch = compose(&load_records()?)?;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let model = Terminator::load(vb, &small_config(Alphabet::Canonical))?;
    let (etab, e_idx) = model.potts(&batch, false)?;

    let tables = SparseEtab::from_batch(
        &batch.ids,
        &etab,
        &e_idx,
        &batch.x_mask,
        &batch.seq_lens,
        Alphabet::Canonical,
    )?;
    assert_eq!(tables.len(), 2);
    assert_eq!(tables[0].pdb, "1TRM");
    assert_eq!(tables[0].num_letters, 20);
    assert!(!tables[0].pairs.is_empty());
    // the last residue of 1TRM is missing an atom
    assert!(tables[0].pairs.iter().all(|p| p.i < 31 && p.j < 31 && p.i != p.j));
    assert!(tables[1].pairs.iter().all(|p| p.i < 36 && p.j < 36));
    assert!(tables.iter().flat_map(|t| &t.pairs).all(|p| p.energies.len() == 400));
    Ok(())
}

#[test]
fn test_positions_beyond_encoding_rejected() -> anyhow::Result<()> {
    let batch = compose(&load_records()?)?;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let config = TerminatorConfig {
        fe_max_len: 20,
        ..small_config(Alphabet::Canonical)
    };
    let model = Terminator::load(vb, &config)?;
    let err = model.forward(&batch, false).unwrap_err();
    assert!(matches!(err, TerminatorError::ConfigConflict(_)));
    Ok(())
}

/// Attach per-focus and per-TERM pair statistics to every record.
fn with_aux_stats(mut records: Vec<ProteinRecord>) -> Vec<ProteinRecord> {
    for record in records.iter_mut() {
        let focus_len = record.focus_len();
        record.ppoe = Some((0..focus_len).map(|f| vec![f as f32 / 10.0, 1.0]).collect());
        record.sing_stats = Some((0..focus_len).map(|_| vec![0.5, -0.5, 0.25]).collect());
        record.pair_stats = Some(
            record
                .term_lens
                .iter()
                .map(|&len| (0..len * len * 4).map(|v| (v % 5) as f32 / 5.0).collect())
                .collect(),
        );
    }
    records
}

#[test]
fn test_aux_stats_path() -> anyhow::Result<()> {
    let records = with_aux_stats(load_records()?);
    let batch = compose(&records)?;
    let aux = batch.aux.as_ref().expect("aux stats batched");
    assert_eq!(aux.ppoe.dims(), &[2, 4, 7, 2]);
    assert_eq!(aux.sing_stats.dims(), &[2, 4, 7, 3]);
    assert_eq!(aux.pair_stats.dims(), &[2, 4, 7, 7, 4]);

    let config = TerminatorConfig {
        num_aux_stats: 5,
        num_pair_stats: 4,
        ..small_config(Alphabet::Canonical)
    };
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let model = Terminator::load(vb, &config)?;
    let loss = model.forward(&batch, false)?.to_scalar::<f32>()?;
    assert!(loss.is_finite());

    // a model that needs the statistics rejects batches without them
    let plain = compose(&load_records()?)?;
    let err = model.forward(&plain, false).unwrap_err();
    assert!(matches!(err, TerminatorError::MissingAuxStats(_)));

    // a model that does not use them ignores them
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let plain_model = Terminator::load(vb, &small_config(Alphabet::Canonical))?;
    assert!(plain_model.forward(&batch, false)?.to_scalar::<f32>()?.is_finite());
    Ok(())
}

#[test]
fn test_unresolved_unknown_residue_scores() -> anyhow::Result<()> {
    let mut records = load_records()?;
    // residue 31 of 1TRM is missing an atom, so it is masked out of the loss
    records[0].sequence[31] = 20;
    let batch = compose(&records)?;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let model = Terminator::load(vb, &small_config(Alphabet::Canonical))?;
    assert!(model.forward(&batch, false)?.to_scalar::<f32>()?.is_finite());

    records[0].sequence[0] = 20;
    let batch = compose(&records)?;
    let err = model.forward(&batch, false).unwrap_err();
    assert!(matches!(err, TerminatorError::IdentityOutOfRange { identity: 20, size: 20 }));
    Ok(())
}
