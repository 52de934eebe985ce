/// Knobs for [`compile_program`](crate::compile_program).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompilerOptions {
    /// Bodies longer than this many IR instructions are split into segments
    /// of at most this many instructions each.
    pub segment_threshold: usize,
    /// When set, every backward jump is preceded by a scheduler checkpoint
    /// registering this many ticks.
    pub back_edge_ticks: Option<u32>,
}

impl CompilerOptions {
    pub const DEFAULT_SEGMENT_THRESHOLD: usize = 256;

    pub fn with_segment_threshold(mut self, threshold: usize) -> Self {
        self.segment_threshold = threshold;
        self
    }

    pub fn with_back_edge_ticks(mut self, ticks: Option<u32>) -> Self {
        self.back_edge_ticks = ticks;
        self
    }
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            segment_threshold: Self::DEFAULT_SEGMENT_THRESHOLD,
            back_edge_ticks: Some(1),
        }
    }
}
