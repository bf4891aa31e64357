use hier_seq2seq::{Batch, Generator, GeneratorConfig, GeneratorError};
use ndarray::{arr1, arr2, Array3};

fn toy_config() -> GeneratorConfig {
    GeneratorConfig::default()
        .with_batch_size(3)
        .with_encoder_shape(3, 4)
        .with_max_dec_steps(5)
        .with_dims(8, 10)
        .with_vocab_size(15)
        .with_seed(11)
}

fn toy_batch() -> Batch {
    let mut enc_batch = Array3::zeros((3, 3, 4));
    for ((b, n, t), v) in enc_batch.indexed_iter_mut() {
        *v = 2 + (4 * b + 3 * n + t) % 13;
    }
    let dec_batch = arr2(&[[1, 2, 5, 8, 0], [1, 6, 9, 0, 0], [1, 10, 0, 0, 0]]);
    let target_batch = arr2(&[[2, 5, 8, 0, 0], [6, 9, 0, 0, 0], [10, 0, 0, 0, 0]]);
    let dec_padding_mask = arr2(&[
        [1.0, 1.0, 1.0, 1.0, 0.0],
        [1.0, 1.0, 1.0, 0.0, 0.0],
        [1.0, 1.0, 0.0, 0.0, 0.0],
    ]);

    Batch {
        enc_batch,
        enc_lens: arr1(&[3, 2, 1]),
        enc_sen_lens: arr2(&[[4, 4, 2], [3, 1, 0], [2, 0, 0]]),
        dec_batch,
        target_batch,
        dec_padding_mask,
        dec_lens: arr1(&[4, 3, 2]),
    }
}

#[test]
fn test_pretraining_reduces_loss() {
    let mut generator = Generator::new(toy_config()).unwrap();
    let batch = toy_batch();

    let first = generator.run_pre_train_step(&batch).unwrap();
    let mut last = first.clone();
    for _ in 0..40 {
        last = generator.run_pre_train_step(&batch).unwrap();
    }

    assert_eq!(last.global_step, 41);
    assert!(last.loss < first.loss, "loss went from {} to {}", first.loss, last.loss);
    assert!(last.per_example_loss.iter().all(|l| l.is_finite()));
}

#[test]
fn test_initial_loss_is_near_uniform() {
    // Tiny truncated-normal projection weights keep the first logits close to zero
    let generator = Generator::new(toy_config()).unwrap();
    let loss = generator.eval_loss(&toy_batch()).unwrap();
    assert!((loss - 15f64.ln()).abs() < 1e-2);
}

#[test]
fn test_global_norm_reported_before_clipping() {
    let config = toy_config().with_max_grad_norm(1e-6);
    let mut generator = Generator::new(config).unwrap();
    let batch = toy_batch();

    let (_, mut gradients) = generator.compute_gradients(&batch).unwrap();
    let raw_norm = gradients.global_norm();
    let output = generator.run_pre_train_step(&batch).unwrap();

    assert!((output.global_norm - raw_norm).abs() < 1e-12);
    assert!(raw_norm > 1e-6);
    gradients.clip_by_global_norm(1e-6);
    assert!((gradients.global_norm() - 1e-6).abs() < 1e-15);
}

#[test]
fn test_decoding_modes_share_parameters() {
    let mut generator = Generator::new(toy_config()).unwrap();
    let batch = toy_batch();

    let greedy = generator.max_generator(&batch).unwrap();
    let sampled = generator.sample_generator(&batch).unwrap();
    let logits = generator.pretrain_logits(&batch).unwrap();

    assert_eq!(greedy.shape(), &[3, 5]);
    assert_eq!(sampled.shape(), &[3, 5]);
    assert_eq!(logits.shape(), &[3, 5, 15]);
    assert_eq!(greedy.column(0), sampled.column(0));
}

#[test]
fn test_greedy_decoding_is_deterministic_after_training() {
    let mut generator = Generator::new(toy_config()).unwrap();
    let batch = toy_batch();
    for _ in 0..5 {
        generator.run_pre_train_step(&batch).unwrap();
    }
    assert_eq!(generator.max_generator(&batch).unwrap(), generator.max_generator(&batch).unwrap());
}

#[test]
fn test_batch_shape_mismatch_is_reported() {
    let generator = Generator::new(toy_config()).unwrap();
    let mut batch = toy_batch();
    batch.dec_batch = arr2(&[[1, 2, 3], [1, 2, 3], [1, 2, 3]]);

    match generator.eval_loss(&batch) {
        Err(GeneratorError::ShapeMismatch { name, expected, got }) => {
            assert_eq!(name, "dec_batch");
            assert_eq!(expected, vec![3, 5]);
            assert_eq!(got, vec![3, 3]);
        }
        other => panic!("expected shape mismatch, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_sentence_length_beyond_maximum_is_reported() {
    let mut generator = Generator::new(toy_config()).unwrap();
    let mut batch = toy_batch();
    batch.enc_sen_lens[[1, 0]] = 5;

    assert!(matches!(
        generator.sample_generator(&batch),
        Err(GeneratorError::InvalidLength { .. })
    ));
}

#[test]
fn test_empty_document_still_decodes() {
    let generator = Generator::new(toy_config()).unwrap();
    let mut batch = toy_batch();
    batch.enc_lens[2] = 0;
    batch.enc_sen_lens.row_mut(2).fill(0);

    let loss = generator.eval_loss(&batch).unwrap();
    assert!(loss.is_finite());
}
