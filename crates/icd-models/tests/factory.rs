//! Integration tests for the model factory: every architecture name builds
//! and runs a forward pass on the CPU, unknown names fail before anything
//! is constructed, weights round-trip through `test_model`.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use icd_models::config::ModelArgs;
use icd_models::models::factory::{pick_model, pick_model_multitask, ModelArch, MODEL_ARCHS};
use icd_models::utils::lookups::Dicts;
use icd_models::{FactoryError, IcdModel};

const NUM_WORDS: usize = 12;

fn dicts() -> Dicts {
    let words: Vec<String> = (0..NUM_WORDS).map(|i| format!("word{:02}", i)).collect();
    Dicts::new(words, vec!["038.9", "401.9", "428.0", "584.9"], HashMap::new())
}

fn write_bert_config(dir: &tempfile::TempDir) -> PathBuf {
    let config = serde_json::json!({
        "vocab_size": 32,
        "hidden_size": 8,
        "num_hidden_layers": 1,
        "num_attention_heads": 2,
        "intermediate_size": 16,
        "hidden_act": "gelu",
        "hidden_dropout_prob": 0.1,
        "max_position_embeddings": 32,
        "type_vocab_size": 2,
        "initializer_range": 0.02,
        "layer_norm_eps": 1e-12,
        "pad_token_id": 0,
        "position_embedding_type": "absolute",
        "use_cache": true,
        "classifier_dropout": null,
        "model_type": "bert"
    });
    fs::write(dir.path().join("config.json"), config.to_string()).unwrap();
    dir.path().to_path_buf()
}

fn tiny_args(model: &str) -> ModelArgs {
    ModelArgs {
        model: model.to_string(),
        embed_size: 8,
        filter_size: Some("3".to_string()),
        num_filter_maps: Some(4),
        rnn_dim: Some(6),
        transformer_layers: 1,
        transformer_heads: 2,
        transformer_ff_dim: 8,
        max_length: 16,
        ..Default::default()
    }
}

fn word_ids(device: &Device) -> Tensor {
    Tensor::new(&[[1u32, 4, 7, 13, 2, 0], [3, 3, 9, 0, 0, 0]], device).unwrap()
}

#[test]
fn every_architecture_builds_and_predicts() -> Result<()> {
    let bert_dir = tempfile::tempdir()?;
    let bert_path = write_bert_config(&bert_dir);
    let dicts = dicts();
    let device = Device::Cpu;

    for name in MODEL_ARCHS {
        let arch: ModelArch = name.parse()?;
        let mut args = tiny_args(name);
        if arch.needs_bert() {
            args.bert_dir = Some(bert_path.clone());
        }

        let mut model =
            pick_model(&args, &dicts).with_context(|| format!("building {}", name))?;
        assert_eq!(model.model_arch(), *name);
        assert_eq!(model.num_labels(), 4, "{}", name);
        assert!(model.num_parameters() > 0, "{}", name);
        model.set_evaluation_mode();
        assert!(!model.is_training());

        let xs = match arch {
            ModelArch::Tfidf => Tensor::rand(0f32, 1f32, (2, NUM_WORDS + 2), &device)?,
            _ => word_ids(&device),
        };
        let logits = model
            .forward(&xs)
            .with_context(|| format!("forward pass of {}", name))?;
        assert_eq!(logits.dims(), &[2, 4], "{}", name);
        let values = logits.flatten_all()?.to_vec1::<f32>()?;
        assert!(values.iter().all(|v| v.is_finite()), "{}", name);
    }
    Ok(())
}

#[test]
fn every_non_bert_architecture_builds_from_defaults() -> Result<()> {
    let dicts = dicts();
    let device = Device::Cpu;
    let ids = Tensor::new(
        &[[1u32, 4, 7, 13, 2, 5, 8, 11, 0, 0], [3, 3, 9, 6, 0, 0, 0, 0, 0, 0]],
        &device,
    )?;

    for name in MODEL_ARCHS {
        let arch: ModelArch = name.parse()?;
        if arch.needs_bert() {
            continue;
        }
        let args = ModelArgs {
            model: name.to_string(),
            ..Default::default()
        };
        let mut model =
            pick_model(&args, &dicts).with_context(|| format!("building {}", name))?;
        model.set_evaluation_mode();

        let (batch, single) = match arch {
            ModelArch::Tfidf => (
                Tensor::rand(0f32, 1f32, (2, NUM_WORDS + 2), &device)?,
                Tensor::rand(0f32, 1f32, (1, NUM_WORDS + 2), &device)?,
            ),
            _ => (ids.clone(), ids.narrow(0, 0, 1)?),
        };
        let logits = model
            .forward(&batch)
            .with_context(|| format!("forward pass of {}", name))?;
        assert_eq!(logits.dims(), &[2, 4], "{}", name);
        let logits = model
            .forward(&single)
            .with_context(|| format!("single-row forward pass of {}", name))?;
        assert_eq!(logits.dims(), &[1, 4], "{}", name);
    }
    Ok(())
}

#[test]
fn bidirectional_gru_rnn_predicts() -> Result<()> {
    let mut args = tiny_args("rnn");
    args.cell_type = Some("gru".to_string());
    args.bidirectional = true;
    args.rnn_layers = Some(2);

    let mut model = pick_model(&args, &dicts())?;
    model.set_evaluation_mode();
    let xs = word_ids(&Device::Cpu);
    assert_eq!(model.forward(&xs)?.dims(), &[2, 4]);
    assert_eq!(model.forward(&xs.narrow(0, 1, 1)?)?.dims(), &[1, 4]);
    Ok(())
}

#[test]
fn unknown_model_name_is_rejected_before_construction() {
    let mut args = tiny_args("conv_atn");
    // would fail to load if construction were attempted
    args.embed_file = Some(PathBuf::from("/nonexistent/vectors.embed"));

    let err = pick_model(&args, &dicts()).err().expect("unknown name must fail");
    assert_eq!(
        err.downcast_ref::<FactoryError>(),
        Some(&FactoryError::UnknownModel("conv_atn".to_string()))
    );
    assert_eq!(err.to_string(), "wrong model name: conv_atn");
}

#[test]
fn pretrained_embeddings_set_the_table() -> Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "**PAD** 0 0 0 0 0")?;
    for i in 0..NUM_WORDS {
        writeln!(file, "word{:02} {} 1 0 0 1", i, i + 1)?;
    }

    let mut args = tiny_args("conv_attn");
    args.embed_file = Some(file.path().to_path_buf());
    let model = pick_model(&args, &dicts())?;

    let data = model.get_varmap().data().lock().unwrap();
    let table = data.get("embed.weight").expect("embedding table").as_tensor();
    // padding row, one row per word, unknown-word row
    assert_eq!(table.dims(), &[NUM_WORDS + 2, 5]);
    let pad = table.get(0)?.to_vec1::<f32>()?;
    assert!(pad.iter().all(|v| *v == 0.0));
    Ok(())
}

#[test]
fn embedding_file_must_cover_the_vocabulary() -> Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "**PAD** 0 0 0 0 0")?;
    writeln!(file, "word00 1 1 0 0 1")?;

    let mut args = tiny_args("conv_attn");
    args.embed_file = Some(file.path().to_path_buf());
    let err = pick_model(&args, &dicts())
        .err()
        .expect("short embedding file must fail");
    let msg = format!("{:#}", err);
    assert!(msg.contains("3 rows"), "{}", msg);
    assert!(msg.contains(&format!("needs {}", NUM_WORDS + 2)), "{}", msg);
    Ok(())
}

#[test]
fn code_embeddings_initialize_label_attention() -> Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "401.9 0.5 0.25 -0.5 1")?;

    let mut args = tiny_args("conv_attn");
    args.code_emb = Some(file.path().to_path_buf());
    let model = pick_model(&args, &dicts())?;

    let data = model.get_varmap().data().lock().unwrap();
    for name in ["output.U.weight", "output.final.weight"] {
        let weight = data.get(name).expect(name).as_tensor();
        assert_eq!(weight.dims(), &[4, 4]);
        // ind2c is sorted: 038.9, 401.9, ...
        assert_eq!(weight.get(1)?.to_vec1::<f32>()?, vec![0.5, 0.25, -0.5, 1.0]);
    }
    Ok(())
}

#[test]
fn test_model_weights_are_loaded() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let weights = dir.path().join("conv_attn.safetensors");
    let dicts = dicts();
    let device = Device::Cpu;

    let mut original = pick_model(&tiny_args("conv_attn"), &dicts)?;
    original.set_evaluation_mode();
    original.save(&weights)?;
    let expected = original.forward(&word_ids(&device))?;

    let mut args = tiny_args("conv_attn");
    args.test_model = Some(weights);
    let mut restored = pick_model(&args, &dicts)?;
    restored.set_evaluation_mode();
    let actual = restored.forward(&word_ids(&device))?;

    let diff = (expected - actual)?.abs()?.max_all()?.to_scalar::<f32>()?;
    assert!(diff < 1e-6);
    Ok(())
}

#[test]
fn test_model_with_mismatched_shapes_fails() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let weights = dir.path().join("small.safetensors");
    pick_model(&tiny_args("conv_attn"), &dicts())?.save(&weights)?;

    let mut args = tiny_args("conv_attn");
    args.num_filter_maps = Some(6);
    args.test_model = Some(weights);
    assert!(pick_model(&args, &dicts()).is_err());
    Ok(())
}

#[test]
fn multitask_builds_shared_features_and_heads() -> Result<()> {
    let mut args = tiny_args("MultiResCNN");
    args.mode = Some("sp-mtl".to_string());
    args.filter_size = Some("3,5".to_string());

    let (mut feature, heads) = pick_model_multitask(&args, &dicts(), &["ccs", "icd"])?;
    assert_eq!(heads.len(), 2);
    feature.set_evaluation_mode();

    let features = feature.forward(&word_ids(&Device::Cpu))?;
    assert_eq!(features.dims(), &[2, 6, 8]);
    for head in &heads {
        assert_eq!(head.model_arch(), "output_layer");
        assert_eq!(head.forward(&features)?.dims(), &[2, 4]);
    }
    Ok(())
}

#[test]
fn multitask_rejects_other_modes_and_models() {
    let cases = [
        (None, "MultiResCNN"),
        (Some("mtl"), "MultiResCNN"),
        (Some("sp-mtl"), "conv_attn"),
    ];
    for (mode, model) in cases {
        let mut args = tiny_args(model);
        args.mode = mode.map(str::to_string);
        let err = pick_model_multitask(&args, &dicts(), &["icd"])
            .err()
            .expect("unsupported pair must fail");
        assert_eq!(
            err.downcast_ref::<FactoryError>(),
            Some(&FactoryError::UnknownModeModel {
                mode: mode.map(str::to_string),
                model: model.to_string(),
            })
        );
    }
}

#[test]
fn description_encoder_follows_lmbda() -> Result<()> {
    let mut dv = HashMap::new();
    dv.insert("401.9".to_string(), vec![2u32, 5, 6]);
    let dicts = Dicts::new(
        (0..NUM_WORDS).map(|i| format!("word{:02}", i)),
        vec!["038.9", "401.9"],
        dv,
    );
    let desc = Tensor::new(&[[2u32, 5, 6], [13, 0, 0]], &Device::Cpu)?;

    let plain = pick_model(&tiny_args("conv_attn"), &dicts)?;
    assert!(plain.embed_descriptions(&desc)?.is_none());

    let mut args = tiny_args("conv_attn");
    args.lmbda = Some(0.5);
    let model = pick_model(&args, &dicts)?;
    let encoded = model.embed_descriptions(&desc)?.expect("description vectors");
    assert_eq!(encoded.dims(), &[2, 4]);
    assert_eq!(encoded.dtype(), DType::F32);
    Ok(())
}
