use hier_seq2seq::{Batch, Generator, GeneratorConfig, GeneratorMetadata, PersistentModel};
use ndarray::{Array1, Array2, Array3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const PAD: usize = 0;
const START: usize = 1;
const STOP: usize = 2;

/// Documents of random sentences whose summary is the first token of each sentence
fn random_batch(config: &GeneratorConfig, rng: &mut StdRng) -> Batch {
    let (b, n, s, t) = (config.batch_size, config.max_enc_num, config.max_enc_steps, config.max_dec_steps);

    let mut enc_batch = Array3::from_elem((b, n, s), PAD);
    let mut enc_lens = Array1::zeros(b);
    let mut enc_sen_lens = Array2::zeros((b, n));
    let mut dec_batch = Array2::from_elem((b, t), PAD);
    let mut target_batch = Array2::from_elem((b, t), PAD);
    let mut dec_padding_mask = Array2::zeros((b, t));
    let mut dec_lens = Array1::zeros(b);

    for doc in 0..b {
        let sentences = rng.gen_range(1..=n.min(t - 1));
        enc_lens[doc] = sentences;

        let mut summary = Vec::with_capacity(sentences);
        for sen in 0..sentences {
            let len = rng.gen_range(1..=s);
            enc_sen_lens[[doc, sen]] = len;
            for tok in 0..len {
                enc_batch[[doc, sen, tok]] = rng.gen_range(3..config.vocab_size);
            }
            summary.push(enc_batch[[doc, sen, 0]]);
        }

        let inputs: Vec<usize> = std::iter::once(START).chain(summary.iter().copied()).collect();
        let targets: Vec<usize> = summary.iter().copied().chain(std::iter::once(STOP)).collect();
        for (step, (&inp, &tgt)) in inputs.iter().zip(&targets).enumerate() {
            dec_batch[[doc, step]] = inp;
            target_batch[[doc, step]] = tgt;
            dec_padding_mask[[doc, step]] = 1.0;
        }
        dec_lens[doc] = inputs.len();
    }

    Batch {
        enc_batch,
        enc_lens,
        enc_sen_lens,
        dec_batch,
        target_batch,
        dec_padding_mask,
        dec_lens,
    }
}

fn main() -> hier_seq2seq::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hier_seq2seq=info".parse().expect("valid directive")),
        )
        .init();

    let config = GeneratorConfig::default()
        .with_batch_size(4)
        .with_encoder_shape(4, 6)
        .with_max_dec_steps(6)
        .with_dims(16, 24)
        .with_vocab_size(30);
    let mut generator = Generator::new(config.clone())?;
    let mut rng = StdRng::seed_from_u64(2024);

    println!("Generator with {} parameters", generator.num_parameters());

    let batches: Vec<Batch> = (0..8).map(|_| random_batch(&config, &mut rng)).collect();
    for epoch in 0..25 {
        let mut epoch_loss = 0.0;
        for batch in &batches {
            epoch_loss += generator.run_pre_train_step(batch)?.loss;
        }
        if epoch % 5 == 0 {
            println!("Epoch {}: loss {:.4}", epoch, epoch_loss / batches.len() as f64);
        }
    }

    let batch = &batches[0];
    println!("Targets:\n{}", batch.target_batch);
    println!("Greedy:\n{}", generator.max_generator(batch)?);
    println!("Sampled:\n{}", generator.sample_generator(batch)?);

    let path = std::env::temp_dir().join("toy_generator.bin");
    let metadata = GeneratorMetadata::for_generator(&generator, "toy_pretrain", Some("copy first tokens".to_string()));
    generator.save(&path, metadata)?;
    println!("Saved to {}", path.display());

    Ok(())
}
