//! Particle data structures using struct-of-arrays layout.

/// Struct-of-arrays particle storage for one species within a patch.
///
/// All arrays are parallel: index `i` across every array refers to the
/// same particle. Separate component arrays (rather than a vector type)
/// are used deliberately for SIMD lane utilization and so each array can
/// be framed independently in migration payloads.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ParticleArrays {
    // ---- Positions ----
    /// X positions (normalized units)
    pub x: Vec<f64>,
    /// Y positions (normalized units)
    pub y: Vec<f64>,

    // ---- Momenta ----
    /// X momenta
    pub px: Vec<f64>,
    /// Y momenta
    pub py: Vec<f64>,
    /// Z momenta
    pub pz: Vec<f64>,

    // ---- Scalar fields ----
    /// Statistical weight (macro-particle weighting)
    pub weight: Vec<f64>,
    /// Charge state
    pub charge: Vec<f64>,
    /// Quantum parameter (radiation model)
    pub chi: Vec<f64>,
    /// Accumulated optical depth (Monte-Carlo emission)
    pub tau: Vec<f64>,
}

impl ParticleArrays {
    /// Create an empty particle collection with no particles allocated.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the number of particles currently stored.
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// Return `true` if there are no particles.
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Append a single particle with the given position, momentum, weight
    /// and charge. The radiation scalars start at zero.
    pub fn push_particle(&mut self, x: f64, y: f64, p: [f64; 3], weight: f64, charge: f64) {
        self.x.push(x);
        self.y.push(y);
        self.px.push(p[0]);
        self.py.push(p[1]);
        self.pz.push(p[2]);
        self.weight.push(weight);
        self.charge.push(charge);
        self.chi.push(0.0);
        self.tau.push(0.0);
    }

    /// Sum of statistical weights, used by conservation diagnostics.
    pub fn total_weight(&self) -> f64 {
        self.weight.iter().sum()
    }

    /// Check that every parallel array holds the same number of entries.
    pub fn is_consistent(&self) -> bool {
        let n = self.x.len();
        self.y.len() == n
            && self.px.len() == n
            && self.py.len() == n
            && self.pz.len() == n
            && self.weight.len() == n
            && self.charge.len() == n
            && self.chi.len() == n
            && self.tau.len() == n
    }
}
