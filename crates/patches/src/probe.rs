//! Diagnostic probes: fixed sample points with accumulated history.

/// A spatial sample point attached to a patch, accumulating one value
/// per recording into its history. Probes migrate with their patch.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Probe {
    /// Sample position in the patch's coordinate frame.
    pub position: [f64; 2],
    /// Accumulated sampled values, oldest first.
    pub history: Vec<f64>,
}

impl Probe {
    /// Create a probe at `position` with empty history.
    pub fn new(position: [f64; 2]) -> Self {
        Self {
            position,
            history: Vec::new(),
        }
    }

    /// Append one sampled value.
    pub fn record(&mut self, value: f64) {
        self.history.push(value);
    }
}
