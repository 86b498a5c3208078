use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use fastrace::prelude::*;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{RngExt, SeedableRng};

use topk_sampler::logging::{self, LoggingConfig};
use topk_sampler::trace_reporter::FileReporter;
use topk_sampler::{
    BatchSlots, DispatchOutcome, ForwardInputs, ForwardOutputs, HostDevice, HostTopKSampler,
    LayerConfig, SetupParams, TopKSamplingLayer, init_rng_states,
};

#[derive(Parser)]
#[command(
    name = "topk-sampler",
    about = "Synthetic continuous-batching driver for the top-K sampling layer"
)]
struct Args {
    /// Layer config JSON (replaces the sizing flags below)
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = 8)]
    max_batch_size: usize,

    #[arg(long, default_value_t = 256)]
    vocab_size: usize,

    #[arg(long, default_value_t = 64)]
    max_seq_len: usize,

    /// Decode steps to run
    #[arg(long, default_value_t = 32)]
    steps: usize,

    /// Reshuffle the active batch every N steps
    #[arg(long, default_value_t = 8)]
    reconfigure_every: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[arg(long, default_value = "info")]
    log_level: String,

    /// Enable tracing and write trace JSON files to this directory
    #[arg(long)]
    trace_output_path: Option<PathBuf>,
}

/// Sampling request of the sequence living in a slot.
#[derive(Clone, Copy, Debug)]
struct Request {
    top_k: i32,
    top_p: f32,
}

impl Request {
    /// Mix of strategies a real batch sees: nucleus-only (handled by another
    /// layer, so skipped here), greedy, plain top-k, and top-k + top-p.
    fn random(rng: &mut StdRng) -> Self {
        match rng.random_range(0..4) {
            0 => Self { top_k: 0, top_p: 0.9 },
            1 => Self { top_k: 0, top_p: 0.0 },
            2 => Self {
                top_k: rng.random_range(1..=64),
                top_p: 0.0,
            },
            _ => Self {
                top_k: rng.random_range(1..=64),
                top_p: rng.random_range(0.5..=1.0),
            },
        }
    }
}

struct Driver {
    layer: TopKSamplingLayer<HostDevice>,
    kernel: HostTopKSampler,
    rng: StdRng,
    requests: Vec<Request>,
    active: Vec<usize>,
    end_ids: Vec<i32>,
    rng_states: Vec<u64>,
    workspace: Vec<u8>,
    output_ids: Vec<i32>,
    sequence_lengths: Vec<i32>,
    finished: Vec<bool>,
    cum_log_probs: Vec<f32>,
}

impl Driver {
    fn new(config: LayerConfig, seed: u64) -> Result<Self> {
        let layer = TopKSamplingLayer::new(HostDevice::new(), config.clone())?;
        let mut rng = StdRng::seed_from_u64(seed);
        let n = config.max_batch_size;
        let requests = (0..n).map(|_| Request::random(&mut rng)).collect();
        let workspace = vec![0u8; layer.workspace_size()];
        Ok(Self {
            layer,
            kernel: HostTopKSampler::new(),
            rng,
            requests,
            active: Vec::new(),
            end_ids: vec![config.vocab_size as i32 - 1; n],
            rng_states: init_rng_states(seed, n),
            workspace,
            output_ids: vec![0; n * config.max_seq_len],
            sequence_lengths: vec![0; n],
            finished: vec![false; n],
            cum_log_probs: vec![0.0; n],
        })
    }

    /// Retire finished or full sequences, pick a new active set in a new
    /// order, and resolve its parameters.
    fn reconfigure(&mut self) -> Result<()> {
        let max_seq_len = self.layer.config().max_seq_len as i32;
        for slot in 0..self.requests.len() {
            if self.finished[slot] || self.sequence_lengths[slot] >= max_seq_len {
                self.requests[slot] = Request::random(&mut self.rng);
                self.sequence_lengths[slot] = 0;
                self.finished[slot] = false;
                self.cum_log_probs[slot] = 0.0;
            }
        }

        let mut slots: Vec<usize> = (0..self.requests.len()).collect();
        slots.shuffle(&mut self.rng);
        let batch_size = self.rng.random_range(1..=slots.len());
        slots.truncate(batch_size);
        self.active = slots;

        let top_k: Vec<i32> = self.active.iter().map(|&s| self.requests[s].top_k).collect();
        let top_p: Vec<f32> = self.active.iter().map(|&s| self.requests[s].top_p).collect();
        self.layer.setup(
            SetupParams::new(self.active.len())
                .batch_slots(BatchSlots::mapped(&self.active))
                .top_k(top_k)
                .top_p(top_p),
        )?;
        info!(
            "Reconfigured: active={:?}, runtime_max_top_k={}",
            self.active,
            self.layer.runtime_max_top_k()
        );
        Ok(())
    }

    /// An active sequence ended or filled its output row.
    fn needs_reconfigure(&self) -> bool {
        let max_seq_len = self.layer.config().max_seq_len as i32;
        self.active
            .iter()
            .any(|&s| self.finished[s] || self.sequence_lengths[s] >= max_seq_len)
    }

    fn step(&mut self) -> Result<DispatchOutcome> {
        let vocab_size = self.layer.config().vocab_size;
        let logits: Vec<f32> = (0..self.active.len() * vocab_size)
            .map(|_| self.rng.random_range(-4.0..4.0))
            .collect();

        let inputs = ForwardInputs {
            batch_size: self.active.len(),
            logits: &logits,
            logits_has_probs: false,
            end_ids: &self.end_ids,
            batch_slots: BatchSlots::mapped(&self.active),
            rng_states: Some(&mut self.rng_states),
            finished: None,
        };
        let outputs = ForwardOutputs {
            output_ids: &mut self.output_ids,
            sequence_lengths: &mut self.sequence_lengths,
            finished: Some(&mut self.finished),
            cum_log_probs: Some(&mut self.cum_log_probs),
            output_log_probs: None,
        };
        let outcome = self
            .layer
            .forward(&mut self.kernel, inputs, outputs, Some(&mut self.workspace))?;
        Ok(outcome)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(LoggingConfig::new(args.log_level.clone()));

    if let Some(ref trace_path) = args.trace_output_path {
        std::fs::create_dir_all(trace_path).with_context(|| {
            format!("Failed to create trace output directory {}", trace_path.display())
        })?;
        fastrace::set_reporter(
            FileReporter::new(trace_path.clone()),
            fastrace::collector::Config::default(),
        );
        info!("Tracing enabled: output_dir={}", trace_path.display());
    }

    let config = match args.config {
        Some(ref path) => LayerConfig::from_file(path)
            .with_context(|| format!("Failed to load layer config {}", path.display()))?,
        None => LayerConfig::new(args.max_batch_size, args.vocab_size)
            .with_max_seq_len(args.max_seq_len),
    };
    info!(
        "Driver: max_batch_size={}, vocab_size={}, max_seq_len={}, steps={}",
        config.max_batch_size, config.vocab_size, config.max_seq_len, args.steps
    );

    let mut driver = Driver::new(config, args.seed)?;
    let reconfigure_every = args.reconfigure_every.max(1);
    let (mut launched, mut skipped) = (0usize, 0usize);
    let start = Instant::now();

    for step in 0..args.steps {
        let root = Span::root("decode_step", SpanContext::random())
            .with_property(|| ("step", step.to_string()));
        let _guard = root.set_local_parent();

        if step % reconfigure_every == 0 || driver.needs_reconfigure() {
            driver.reconfigure()?;
        }
        match driver.step()? {
            DispatchOutcome::Launched => launched += 1,
            DispatchOutcome::Skipped => {
                debug!("Step {}: no active slot uses top-k", step);
                skipped += 1;
            }
        }
    }

    let generated: i32 = driver.sequence_lengths.iter().sum();
    info!(
        "Done in {:.2}ms: launched={}, skipped={}, tokens_in_flight={}, runtime_max_top_k={}",
        start.elapsed().as_secs_f64() * 1000.0,
        launched,
        skipped,
        generated,
        driver.layer.runtime_max_top_k()
    );

    if args.trace_output_path.is_some() {
        info!("Flushing pending traces...");
        fastrace::flush();
    }
    Ok(())
}
