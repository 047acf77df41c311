use candle_core::{DType, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::CoreResult;
use crate::model::SamplingParams;

/// Picks the next token from a logits vector.
///
/// Non-greedy path: temperature scaling, softmax, top-p nucleus filter, then
/// one multinomial draw from a seeded [`StdRng`]. All of it runs on a single
/// CPU copy of the logits.
#[derive(Debug)]
pub struct Sampler {
    rng: StdRng,
    temperature: f64,
    top_p: f64,
    do_sample: bool,
}

impl Sampler {
    pub fn new(params: &SamplingParams) -> Self {
        let rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            temperature: params.temperature,
            top_p: params.top_p,
            do_sample: params.do_sample && params.temperature > 0.0,
        }
    }

    /// Sample from a `[vocab]` logits tensor.
    pub fn sample(&mut self, logits: &Tensor) -> CoreResult<u32> {
        let logits: Vec<f32> = logits.to_dtype(DType::F32)?.to_vec1()?;
        Ok(self.sample_slice(&logits))
    }

    pub fn sample_slice(&mut self, logits: &[f32]) -> u32 {
        if !self.do_sample {
            return argmax(logits);
        }
        let mut probs = softmax_with_temperature(logits, self.temperature);
        top_p_filter(&mut probs, self.top_p);
        let r: f32 = self.rng.gen();
        draw(&probs, r)
    }
}

fn argmax(logits: &[f32]) -> u32 {
    logits
        .iter()
        .enumerate()
        .fold((0usize, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0 as u32
}

/// Numerically stable softmax of `logits / temperature`.
fn softmax_with_temperature(logits: &[f32], temperature: f64) -> Vec<f32> {
    let t = if temperature > 0.0 { temperature as f32 } else { 1.0 };
    let max = logits
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f32::NEG_INFINITY, f32::max);
    let mut probs: Vec<f32> = logits.iter().map(|&v| ((v - max) / t).exp()).collect();
    let sum: f32 = probs.iter().sum();
    if sum > 0.0 {
        probs.iter_mut().for_each(|p| *p /= sum);
    }
    probs
}

/// Zero every probability outside the smallest set whose mass reaches
/// `top_p`, then renormalise. No-op for `top_p >= 1.0`.
fn top_p_filter(probs: &mut [f32], top_p: f64) {
    if top_p >= 1.0 {
        return;
    }
    let mut order: Vec<usize> = (0..probs.len()).collect();
    order.sort_unstable_by(|&a, &b| probs[b].total_cmp(&probs[a]));

    let mut cumulative = 0.0f64;
    let mut cutoff = order.len();
    for (rank, &idx) in order.iter().enumerate() {
        cumulative += probs[idx] as f64;
        if cumulative >= top_p {
            cutoff = rank + 1;
            break;
        }
    }
    for &idx in &order[cutoff..] {
        probs[idx] = 0.0;
    }
    let kept: f32 = probs.iter().sum();
    if kept > 0.0 {
        probs.iter_mut().for_each(|p| *p /= kept);
    }
}

/// Inverse-CDF draw with `r` in `[0, 1)`.
fn draw(probs: &[f32], r: f32) -> u32 {
    let mut cumulative = 0.0f32;
    for (i, &p) in probs.iter().enumerate() {
        cumulative += p;
        if r < cumulative {
            return i as u32;
        }
    }
    // Rounding left the CDF short of 1.0: take the last non-zero entry.
    probs.iter().rposition(|&p| p > 0.0).unwrap_or(0) as u32
}
