/// Compilation settings shared by every phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Run the peephole optimizer.
    pub optimize: bool,
    /// Upper bound on optimizer rounds.
    pub max_rounds: usize,
    /// Range loops with at most this many iterations over literal bounds
    /// are unrolled. Zero disables unrolling.
    pub unroll_limit: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            optimize: true,
            max_rounds: 32,
            unroll_limit: 4,
        }
    }
}
