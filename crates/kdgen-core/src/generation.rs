//! Autoregressive decode loop shared by every backend.

use candle_core::{Device, IndexOp, Tensor};

use crate::error::{CoreError, CoreResult};
use crate::model::SamplingParams;
use crate::sampling::Sampler;

/// Prefill `prompt_ids`, then decode one token at a time until a stop token,
/// `max_new_tokens`, or `max_seq_len` is reached.
///
/// `forward(input, index_pos)` runs the model on a `[1, seq]` id tensor whose
/// first token sits at absolute position `index_pos`. A call with
/// `index_pos == 0` starts a fresh sequence.
pub(crate) fn run_generation<F>(
    device: &Device,
    prompt_ids: &[u32],
    params: &SamplingParams,
    max_seq_len: usize,
    mut forward: F,
) -> CoreResult<Vec<u32>>
where
    F: FnMut(&Tensor, usize) -> CoreResult<Tensor>,
{
    if prompt_ids.is_empty() {
        return Err(CoreError::EmptyPrompt);
    }
    if prompt_ids.len() > max_seq_len {
        return Err(CoreError::SequenceTooLong { got: prompt_ids.len(), max: max_seq_len });
    }

    let budget = params.max_new_tokens.min(max_seq_len - prompt_ids.len());
    let mut sampler = Sampler::new(params);
    let mut generated = Vec::with_capacity(budget);

    let mut input = Tensor::new(prompt_ids, device)?.unsqueeze(0)?;
    let mut index_pos = 0;
    for _ in 0..budget {
        let step_len = input.dim(1)?;
        let logits = forward(&input, index_pos)?;
        let logits = last_token_logits(&logits, step_len - 1)?;
        let next = sampler.sample(&logits)?;
        if params.stop_token_ids.contains(&next) {
            break;
        }
        generated.push(next);
        index_pos += step_len;
        input = Tensor::new(&[next], device)?.unsqueeze(0)?;
    }
    Ok(generated)
}

/// Reduce model output to a 1-D `[vocab]` tensor for the given position.
///
/// Accepts `[batch, seq, vocab]`, `[batch, vocab]` (already the last
/// position) and `[vocab]`.
pub(crate) fn last_token_logits(logits: &Tensor, seq_pos: usize) -> CoreResult<Tensor> {
    match logits.dims() {
        [_, _, _] => Ok(logits.i((0, seq_pos))?),
        [_, _] => Ok(logits.i(0)?),
        [_] => Ok(logits.clone()),
        dims => Err(CoreError::config("logits", format!("unexpected logits shape {dims:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VOCAB: usize = 8;

    fn greedy(max_new_tokens: usize, stop: Vec<u32>) -> SamplingParams {
        SamplingParams { max_new_tokens, do_sample: false, stop_token_ids: stop, ..Default::default() }
    }

    /// Fake model: always peaks on `script[call]`, recording each call's
    /// `(seq_len, index_pos)`.
    fn scripted<'a>(
        script: &'a [u32],
        calls: &'a mut Vec<(usize, usize)>,
    ) -> impl FnMut(&Tensor, usize) -> CoreResult<Tensor> + 'a {
        move |input, index_pos| {
            let step = calls.len();
            calls.push((input.dim(1)?, index_pos));
            let mut logits = vec![0f32; VOCAB];
            logits[script[step.min(script.len() - 1)] as usize] = 10.0;
            Ok(Tensor::new(logits.as_slice(), &Device::Cpu)?.unsqueeze(0)?)
        }
    }

    #[test]
    fn prefill_then_single_token_steps() {
        let mut calls = Vec::new();
        let out = run_generation(&Device::Cpu, &[1, 2, 3], &greedy(3, vec![]), 64, scripted(&[4, 5, 6], &mut calls))
            .unwrap();
        assert_eq!(out, vec![4, 5, 6]);
        assert_eq!(calls, vec![(3, 0), (1, 3), (1, 4)]);
    }

    #[test]
    fn stop_token_is_excluded() {
        let mut calls = Vec::new();
        let out = run_generation(&Device::Cpu, &[1], &greedy(10, vec![7]), 64, scripted(&[4, 7, 5], &mut calls))
            .unwrap();
        assert_eq!(out, vec![4]);
        assert_eq!(calls.len(), 2);
    }

    #[test]
    fn immediate_stop_yields_empty_output() {
        let mut calls = Vec::new();
        let out = run_generation(&Device::Cpu, &[1], &greedy(10, vec![7]), 64, scripted(&[7], &mut calls))
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn budget_capped_by_context() {
        let mut calls = Vec::new();
        let out = run_generation(&Device::Cpu, &[1, 2], &greedy(512, vec![]), 5, scripted(&[3], &mut calls))
            .unwrap();
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn zero_budget_never_calls_model() {
        let mut calls = Vec::new();
        let out = run_generation(&Device::Cpu, &[1], &greedy(0, vec![]), 64, scripted(&[3], &mut calls)).unwrap();
        assert!(out.is_empty());
        assert!(calls.is_empty());
    }

    #[test]
    fn empty_and_oversized_prompts_rejected() {
        let mut calls = Vec::new();
        let err = run_generation(&Device::Cpu, &[], &greedy(4, vec![]), 64, scripted(&[3], &mut calls)).unwrap_err();
        assert!(matches!(err, CoreError::EmptyPrompt));

        let err = run_generation(&Device::Cpu, &[1, 2, 3], &greedy(4, vec![]), 2, scripted(&[3], &mut calls))
            .unwrap_err();
        assert!(matches!(err, CoreError::SequenceTooLong { got: 3, max: 2 }));
    }

    #[test]
    fn logits_shapes() {
        let full = Tensor::zeros((1, 4, VOCAB), candle_core::DType::F32, &Device::Cpu).unwrap();
        assert_eq!(last_token_logits(&full, 3).unwrap().dims(), &[VOCAB]);
        let last = Tensor::zeros((1, VOCAB), candle_core::DType::F32, &Device::Cpu).unwrap();
        assert_eq!(last_token_logits(&last, 0).unwrap().dims(), &[VOCAB]);
        let bad = Tensor::zeros((1, 1, 1, VOCAB), candle_core::DType::F32, &Device::Cpu).unwrap();
        assert!(last_token_logits(&bad, 0).is_err());
    }
}
