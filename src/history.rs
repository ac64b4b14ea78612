// convstack - training-error history

use crate::helpers::*;

/// Number of recorded samples that triggers decimation.
const MAX_HISTORY: usize = 1024;

/// Bounded training-error history for diagnostic export.
///
/// One value is kept per `step` recorded errors. When the buffer reaches
/// capacity, adjacent pairs are averaged and the step doubles, so a run of
/// any length fits in 1024 samples at progressively coarser resolution.
#[derive(Clone, Debug)]
pub struct ErrorHistory {
    values: FloatBuffer,
    step: usize,
    ctr: usize,
}

impl ErrorHistory {
    pub fn new() -> Self {
        Self {
            values: Vec::new(),
            step: 1,
            ctr: 0,
        }
    }

    /// Record one training-step error value.
    pub fn record(&mut self, value: f32) {
        self.ctr += 1;
        if self.ctr < self.step {
            return;
        }
        self.ctr = 0;

        self.values.push(value);

        if self.values.len() >= MAX_HISTORY {
            let mut compacted = FloatBuffer::with_capacity(MAX_HISTORY / 2);
            for pair in self.values.chunks_exact(2) {
                compacted.push((pair[0] + pair[1]) * 0.5);
            }
            self.values = compacted;
            self.step *= 2;
        }
    }

    /// The recorded error samples, oldest first.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Training steps between consecutive recorded samples.
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn write(&self, writer: &mut dyn StreamWriter) {
        writer.write_u32(self.step as u32);
        writer.write_u32(self.ctr as u32);
        writer.write_u32(self.values.len() as u32);
        writer.write_f32_slice(&self.values);
    }

    pub fn read(reader: &mut dyn StreamReader) -> Self {
        let step = reader.read_u32() as usize;
        let ctr = reader.read_u32() as usize;
        let len = reader.read_u32() as usize;
        let mut values = vec![0.0f32; len];
        reader.read_f32_slice(&mut values);
        Self { values, step, ctr }
    }
}

impl Default for ErrorHistory {
    fn default() -> Self {
        Self::new()
    }
}
