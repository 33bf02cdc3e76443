//! Named field sub-grids over a patch's local cells plus ghost halo.

/// Whether a field stores real or complex samples.
///
/// Complex fields (azimuthal-mode decompositions) interleave
/// real/imaginary pairs in the data array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FieldKind {
    /// One `f64` per cell.
    Real,
    /// Interleaved `(re, im)` pairs, two `f64` per cell.
    Complex,
}

impl FieldKind {
    /// Number of `f64` values stored per cell.
    pub fn stride(&self) -> usize {
        match self {
            FieldKind::Real => 1,
            FieldKind::Complex => 2,
        }
    }
}

/// One named field array over the patch's cells, including the
/// ghost-cell halo on every side.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FieldGrid {
    /// Field name ("Ex", "Rho", ...), unique within a patch.
    pub name: String,
    /// Interior cells along x.
    pub nx: usize,
    /// Interior cells along y.
    pub ny: usize,
    /// Ghost cells on each side.
    pub ghost: usize,
    /// Real or complex samples.
    pub kind: FieldKind,
    /// Row-major samples over `(nx + 2*ghost) * (ny + 2*ghost)` cells.
    pub data: Vec<f64>,
}

impl FieldGrid {
    /// Create a zero-filled field of the given shape.
    pub fn zeros(name: impl Into<String>, nx: usize, ny: usize, ghost: usize, kind: FieldKind) -> Self {
        let cells = (nx + 2 * ghost) * (ny + 2 * ghost);
        Self {
            name: name.into(),
            nx,
            ny,
            ghost,
            kind,
            data: vec![0.0; cells * kind.stride()],
        }
    }

    /// Total number of stored `f64` values the shape implies.
    pub fn expected_len(&self) -> usize {
        (self.nx + 2 * self.ghost) * (self.ny + 2 * self.ghost) * self.kind.stride()
    }

    /// Check that the data length matches the declared shape.
    pub fn is_consistent(&self) -> bool {
        self.data.len() == self.expected_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeros_has_halo_cells() {
        let f = FieldGrid::zeros("Ex", 4, 4, 2, FieldKind::Real);
        assert_eq!(f.data.len(), 8 * 8);
        assert!(f.is_consistent());
    }

    #[test]
    fn complex_doubles_storage() {
        let f = FieldGrid::zeros("Er_mode1", 3, 3, 1, FieldKind::Complex);
        assert_eq!(f.data.len(), 5 * 5 * 2);
        assert!(f.is_consistent());
    }

    #[test]
    fn inconsistent_shape_detected() {
        let mut f = FieldGrid::zeros("Rho", 2, 2, 0, FieldKind::Real);
        f.data.pop();
        assert!(!f.is_consistent());
    }
}
