//! Single LSTM layer with a configurable cell activation.
//!
//! Gate layout in the fused kernels is `[input, forget, cell, output]`, each
//! `units` wide. Gates use sigmoid. The cell candidate and the hidden output
//! use relu, the activation the forecaster was tuned with.

use candle_core::{DType, Device, Result, Tensor, Var};
use candle_nn::ops::sigmoid;
use rand::rngs::StdRng;

use crate::init::{glorot_uniform, orthogonal};

/// Hidden and cell state after one time step.
#[derive(Debug, Clone)]
pub struct LstmState {
    pub h: Tensor,
    pub c: Tensor,
}

#[derive(Debug, Clone)]
pub struct ReluLstm {
    /// `(input_dim, 4 * units)`
    kernel: Var,
    /// `(units, 4 * units)`
    recurrent_kernel: Var,
    /// `(4 * units)`, forget slice starts at 1.0
    bias: Var,
    input_dim: usize,
    units: usize,
}

impl ReluLstm {
    pub fn new(input_dim: usize, units: usize, rng: &mut StdRng, device: &Device) -> Result<Self> {
        let gates = 4 * units;
        let kernel = Tensor::from_vec(
            glorot_uniform(rng, input_dim, gates),
            (input_dim, gates),
            device,
        )?;
        let recurrent_kernel =
            Tensor::from_vec(orthogonal(rng, units, gates), (units, gates), device)?;

        let mut bias = vec![0f32; gates];
        bias[units..2 * units].iter_mut().for_each(|b| *b = 1.0);
        let bias = Tensor::from_vec(bias, gates, device)?;

        Ok(Self {
            kernel: Var::from_tensor(&kernel)?,
            recurrent_kernel: Var::from_tensor(&recurrent_kernel)?,
            bias: Var::from_tensor(&bias)?,
            input_dim,
            units,
        })
    }

    pub fn units(&self) -> usize {
        self.units
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn vars(&self) -> Vec<Var> {
        vec![
            self.kernel.clone(),
            self.recurrent_kernel.clone(),
            self.bias.clone(),
        ]
    }

    pub fn parameter_count(&self) -> usize {
        4 * self.units * (self.input_dim + self.units + 1)
    }

    pub fn zero_state(&self, batch: usize, device: &Device) -> Result<LstmState> {
        let zeros = Tensor::zeros((batch, self.units), DType::F32, device)?;
        Ok(LstmState {
            h: zeros.clone(),
            c: zeros,
        })
    }

    /// `x` is `(batch, input_dim)`.
    pub fn step(&self, x: &Tensor, state: &LstmState) -> Result<LstmState> {
        let z = x
            .matmul(self.kernel.as_tensor())?
            .add(&state.h.matmul(self.recurrent_kernel.as_tensor())?)?
            .broadcast_add(self.bias.as_tensor())?;
        let gates = z.chunk(4, 1)?;

        let input = sigmoid(&gates[0])?;
        let forget = sigmoid(&gates[1])?;
        let candidate = gates[2].relu()?;
        let output = sigmoid(&gates[3])?;

        let c = forget.mul(&state.c)?.add(&input.mul(&candidate)?)?;
        let h = output.mul(&c.relu()?)?;
        Ok(LstmState { h, c })
    }

    /// Runs the layer over `(batch, time_steps, input_dim)` and returns every state.
    pub fn seq(&self, xs: &Tensor) -> Result<Vec<LstmState>> {
        let (batch, steps, _) = xs.dims3()?;
        let mut state = self.zero_state(batch, xs.device())?;
        let mut states = Vec::with_capacity(steps);
        for t in 0..steps {
            let x = xs.narrow(1, t, 1)?.squeeze(1)?.contiguous()?;
            state = self.step(&x, &state)?;
            states.push(state.clone());
        }
        Ok(states)
    }

    /// Stacks the hidden states of `seq` back into `(batch, time_steps, units)`.
    pub fn seq_output(&self, xs: &Tensor) -> Result<Tensor> {
        let hs: Vec<Tensor> = self.seq(xs)?.into_iter().map(|s| s.h).collect();
        Tensor::stack(&hs, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn layer(input_dim: usize, units: usize) -> ReluLstm {
        let mut rng = StdRng::seed_from_u64(0);
        ReluLstm::new(input_dim, units, &mut rng, &Device::Cpu).unwrap()
    }

    #[test]
    fn kernel_shapes_follow_units() {
        let lstm = layer(5, 8);
        let vars = lstm.vars();
        assert_eq!(vars[0].dims(), &[5, 32]);
        assert_eq!(vars[1].dims(), &[8, 32]);
        assert_eq!(vars[2].dims(), &[32]);
        assert_eq!(lstm.parameter_count(), 4 * 8 * (5 + 8 + 1));
    }

    #[test]
    fn forget_bias_starts_at_one() {
        let lstm = layer(2, 3);
        let bias = lstm.vars()[2].as_tensor().to_vec1::<f32>().unwrap();
        assert_eq!(&bias[0..3], &[0.0, 0.0, 0.0]);
        assert_eq!(&bias[3..6], &[1.0, 1.0, 1.0]);
        assert_eq!(&bias[6..12], &[0.0; 6]);
    }

    #[test]
    fn seq_yields_one_state_per_step() {
        let lstm = layer(5, 10);
        let xs = Tensor::ones((4, 3, 5), DType::F32, &Device::Cpu).unwrap();
        let states = lstm.seq(&xs).unwrap();
        assert_eq!(states.len(), 3);
        assert_eq!(states[2].h.dims(), &[4, 10]);

        let stacked = lstm.seq_output(&xs).unwrap();
        assert_eq!(stacked.dims(), &[4, 3, 10]);
    }

    #[test]
    fn relu_hidden_state_is_non_negative() {
        let lstm = layer(3, 6);
        let xs = Tensor::randn(0f32, 1f32, (8, 4, 3), &Device::Cpu).unwrap();
        let last = lstm.seq(&xs).unwrap().pop().unwrap();
        let h = last.h.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(h.iter().all(|v| *v >= 0.0));
    }
}
