use rand::RngCore;
use rand::rngs::StdRng;

/// Source of uniformly distributed 32-bit values.
///
/// Every random decision the engine makes (jitter, duplication, BER loss) goes
/// through one of these so tests can replay exact sequences.
pub trait UniformSource: Send {
    fn next_u32(&mut self) -> u32;
}

impl UniformSource for StdRng {
    fn next_u32(&mut self) -> u32 {
        RngCore::next_u32(self)
    }
}

/// Replays a fixed list of values, wrapping around at the end.
#[derive(Debug, Clone)]
pub struct SequenceSource {
    values: Vec<u32>,
    pos: usize,
}

impl SequenceSource {
    pub fn new(values: Vec<u32>) -> Self {
        assert!(!values.is_empty(), "sequence source needs at least one value");
        Self { values, pos: 0 }
    }

    pub fn constant(value: u32) -> Self {
        Self::new(vec![value])
    }

    pub fn consumed(&self) -> usize {
        self.pos
    }
}

impl UniformSource for SequenceSource {
    fn next_u32(&mut self) -> u32 {
        let value = self.values[self.pos % self.values.len()];
        self.pos += 1;
        value
    }
}
