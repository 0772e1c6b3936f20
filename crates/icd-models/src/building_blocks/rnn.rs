use anyhow::{anyhow, Result};
use candle_core::{Tensor, D};
use candle_nn::{rnn, VarBuilder, RNN};

#[derive(Debug, Clone)]
enum Cell {
    Gru(rnn::GRU),
    Lstm(rnn::LSTM),
}

impl Cell {
    fn new(cell_type: &str, input_size: usize, hidden_size: usize, vb: VarBuilder) -> Result<Self> {
        match cell_type {
            "gru" => Ok(Cell::Gru(rnn::gru(input_size, hidden_size, Default::default(), vb)?)),
            "lstm" => Ok(Cell::Lstm(rnn::lstm(input_size, hidden_size, Default::default(), vb)?)),
            other => Err(anyhow!("Unsupported RNN cell type: {}", other)),
        }
    }

    /// `(batch, seq, input)` to `(batch, seq, hidden)`.
    fn run(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Cell::Gru(gru) => {
                // GRU::states_to_tensor concatenates along dim 1, flattening time
                let states = gru.seq(xs)?;
                let hs: Vec<Tensor> = states.iter().map(|s| s.h().clone()).collect();
                Tensor::stack(&hs, 1)
            }
            Cell::Lstm(lstm) => {
                let states = lstm.seq(xs)?;
                lstm.states_to_tensor(&states)
            }
        }
    }
}

fn reverse_time(xs: &Tensor) -> candle_core::Result<Tensor> {
    let seq_len = xs.dim(1)?;
    let idx: Vec<u32> = (0..seq_len as u32).rev().collect();
    let idx = Tensor::new(idx.as_slice(), xs.device())?;
    xs.index_select(&idx, 1)
}

/// Stacked, optionally bidirectional GRU or LSTM.
#[derive(Debug, Clone)]
pub struct RecurrentEncoder {
    forward_cells: Vec<Cell>,
    backward_cells: Vec<Cell>,
    hidden_size: usize,
}

impl RecurrentEncoder {
    /// `hidden_size` is per direction.
    pub fn new(
        cell_type: &str,
        input_size: usize,
        hidden_size: usize,
        num_layers: usize,
        bidirectional: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let directions = if bidirectional { 2 } else { 1 };
        let mut forward_cells = Vec::with_capacity(num_layers);
        let mut backward_cells = Vec::new();
        for layer in 0..num_layers {
            let layer_input = if layer == 0 { input_size } else { hidden_size * directions };
            forward_cells.push(Cell::new(
                cell_type,
                layer_input,
                hidden_size,
                vb.pp(format!("l{}", layer)),
            )?);
            if bidirectional {
                backward_cells.push(Cell::new(
                    cell_type,
                    layer_input,
                    hidden_size,
                    vb.pp(format!("l{}_reverse", layer)),
                )?);
            }
        }
        Ok(Self {
            forward_cells,
            backward_cells,
            hidden_size,
        })
    }

    pub fn output_size(&self) -> usize {
        if self.backward_cells.is_empty() {
            self.hidden_size
        } else {
            self.hidden_size * 2
        }
    }

    /// Returns the full output sequence `(batch, seq, output_size)` and the
    /// final state `(batch, output_size)`: last forward step concatenated with
    /// the first backward step.
    pub fn forward(&self, xs: &Tensor) -> candle_core::Result<(Tensor, Tensor)> {
        if xs.dim(1)? == 0 {
            return Err(candle_core::Error::Msg(
                "recurrent encoder needs at least one time step".to_string(),
            ));
        }
        let mut x = xs.clone();
        for (layer, fw) in self.forward_cells.iter().enumerate() {
            let fw_out = fw.run(&x)?;
            x = match self.backward_cells.get(layer) {
                Some(bw) => {
                    let bw_out = reverse_time(&bw.run(&reverse_time(&x)?)?)?;
                    Tensor::cat(&[&fw_out, &bw_out], D::Minus1)?
                }
                None => fw_out,
            };
        }

        let seq_len = x.dim(1)?;
        let last_fw = x
            .narrow(1, seq_len - 1, 1)?
            .squeeze(1)?
            .narrow(1, 0, self.hidden_size)?;
        let last = if self.backward_cells.is_empty() {
            last_fw
        } else {
            let first_bw = x
                .narrow(1, 0, 1)?
                .squeeze(1)?
                .narrow(1, self.hidden_size, self.hidden_size)?;
            Tensor::cat(&[&last_fw, &first_bw], 1)?
        };
        Ok((x, last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn bidirectional_lstm_shapes() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let encoder = RecurrentEncoder::new("lstm", 5, 4, 2, true, vb.pp("rnn"))?;
        let xs = Tensor::randn(0f32, 1f32, (3, 6, 5), &device)?;

        let (out, last) = encoder.forward(&xs)?;
        assert_eq!(out.dims(), &[3, 6, 8]);
        assert_eq!(last.dims(), &[3, 8]);
        assert_eq!(encoder.output_size(), 8);
        Ok(())
    }

    #[test]
    fn unidirectional_gru_shapes() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let encoder = RecurrentEncoder::new("gru", 5, 7, 1, false, vb.pp("rnn"))?;
        let xs = Tensor::randn(0f32, 1f32, (2, 4, 5), &device)?;

        let (out, last) = encoder.forward(&xs)?;
        assert_eq!(out.dims(), &[2, 4, 7]);
        assert_eq!(last.dims(), &[2, 7]);
        Ok(())
    }

    #[test]
    fn bidirectional_gru_single_row() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let encoder = RecurrentEncoder::new("gru", 5, 3, 2, true, vb.pp("rnn"))?;
        let xs = Tensor::randn(0f32, 1f32, (1, 4, 5), &device)?;

        let (out, last) = encoder.forward(&xs)?;
        assert_eq!(out.dims(), &[1, 4, 6]);
        assert_eq!(last.dims(), &[1, 6]);
        Ok(())
    }

    #[test]
    fn gru_last_state_is_final_step() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let encoder = RecurrentEncoder::new("gru", 5, 7, 1, false, vb.pp("rnn"))?;
        let xs = Tensor::randn(0f32, 1f32, (2, 4, 5), &device)?;

        let (out, last) = encoder.forward(&xs)?;
        let final_step = out.narrow(1, 3, 1)?.squeeze(1)?;
        let diff = (final_step - last)?.abs()?.max_all()?.to_scalar::<f32>()?;
        assert_eq!(diff, 0.0);
        Ok(())
    }

    #[test]
    fn empty_sequence_fails() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let encoder = RecurrentEncoder::new("gru", 5, 4, 1, false, vb)?;
        let xs = Tensor::zeros((2, 0, 5), DType::F32, &device)?;
        assert!(encoder.forward(&xs).is_err());
        Ok(())
    }

    #[test]
    fn unknown_cell_type_fails() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        assert!(RecurrentEncoder::new("tanh", 5, 4, 1, false, vb).is_err());
    }
}
