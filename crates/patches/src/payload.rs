//! Self-describing migration payloads with length-prefixed framing.
//!
//! Particle populations vary per patch, so a receiver cannot size its
//! buffers in advance. Each frame therefore carries an explicit header
//! (element counts per species, field, and probe) ahead of the body:
//!
//! ```text
//! [ header length: u64 LE ][ header (bincode) ][ body (bincode) ]
//! ```
//!
//! Decoding re-validates the header against the decoded body. Any
//! disagreement means the simulation state is no longer trustworthy and
//! surfaces as a [`PayloadError`], which callers treat as fatal.

use serde::{Deserialize, Serialize};

use crate::{FieldGrid, Patch, ParticleArrays, Probe};

/// Integrity failure while framing or decoding a migration payload.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// Frame shorter than its own length prefix claims.
    #[error("payload truncated: need {needed} bytes, {available} available")]
    Truncated {
        /// Bytes the frame claims to contain.
        needed: usize,
        /// Bytes actually present.
        available: usize,
    },
    /// Header counts disagree with the decoded body.
    #[error("payload header disagrees with body for {section}: header says {declared}, body has {actual}")]
    CountMismatch {
        /// Which part of the payload disagreed.
        section: &'static str,
        /// Count announced in the header.
        declared: u64,
        /// Count found in the body.
        actual: u64,
    },
    /// Bytes left over after the body was fully decoded.
    #[error("payload has {0} trailing bytes after body")]
    TrailingBytes(usize),
    /// Serialization layer failure.
    #[error("payload codec error: {0}")]
    Codec(#[from] bincode::Error),
}

/// Frame header: everything a receiver needs to validate the body.
#[derive(Debug, Serialize, Deserialize)]
struct PayloadHeader {
    hindex: u64,
    coords: (u64, u64),
    /// Particle count per species, in species order.
    species_len: Vec<u64>,
    /// Stored `f64` count per field grid, in field order.
    field_len: Vec<u64>,
    /// History length per probe, in probe order.
    probe_len: Vec<u64>,
}

/// Frame body: the patch state itself.
#[derive(Debug, Serialize, Deserialize)]
struct PayloadBody {
    species: Vec<ParticleArrays>,
    fields: Vec<FieldGrid>,
    probes: Vec<Probe>,
}

/// Serialize a patch into a self-contained migration frame.
pub fn encode(patch: &Patch) -> Result<Vec<u8>, PayloadError> {
    let header = PayloadHeader {
        hindex: patch.hindex,
        coords: patch.coords,
        species_len: patch.species.iter().map(|s| s.len() as u64).collect(),
        field_len: patch.fields.iter().map(|f| f.data.len() as u64).collect(),
        probe_len: patch.probes.iter().map(|p| p.history.len() as u64).collect(),
    };
    let body = PayloadBody {
        species: patch.species.clone(),
        fields: patch.fields.clone(),
        probes: patch.probes.clone(),
    };

    let header_bytes = bincode::serialize(&header)?;
    let body_bytes = bincode::serialize(&body)?;

    let mut frame = Vec::with_capacity(8 + header_bytes.len() + body_bytes.len());
    frame.extend_from_slice(&(header_bytes.len() as u64).to_le_bytes());
    frame.extend_from_slice(&header_bytes);
    frame.extend_from_slice(&body_bytes);
    Ok(frame)
}

/// Decode and validate a migration frame, reconstructing the patch.
pub fn decode(frame: &[u8]) -> Result<Patch, PayloadError> {
    if frame.len() < 8 {
        return Err(PayloadError::Truncated {
            needed: 8,
            available: frame.len(),
        });
    }
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&frame[..8]);
    let header_len = u64::from_le_bytes(len_bytes) as usize;

    let rest = &frame[8..];
    if rest.len() < header_len {
        return Err(PayloadError::Truncated {
            needed: header_len,
            available: rest.len(),
        });
    }
    let header: PayloadHeader = bincode::deserialize(&rest[..header_len])?;

    let body_bytes = &rest[header_len..];
    let mut reader = std::io::Cursor::new(body_bytes);
    let body: PayloadBody = bincode::deserialize_from(&mut reader)?;
    let consumed = reader.position() as usize;
    if consumed != body_bytes.len() {
        return Err(PayloadError::TrailingBytes(body_bytes.len() - consumed));
    }

    validate(&header, &body)?;

    Ok(Patch {
        hindex: header.hindex,
        coords: header.coords,
        species: body.species,
        fields: body.fields,
        probes: body.probes,
    })
}

fn validate(header: &PayloadHeader, body: &PayloadBody) -> Result<(), PayloadError> {
    check_count("species list", header.species_len.len(), body.species.len())?;
    check_count("field list", header.field_len.len(), body.fields.len())?;
    check_count("probe list", header.probe_len.len(), body.probes.len())?;

    for (declared, species) in header.species_len.iter().zip(&body.species) {
        if !species.is_consistent() {
            return Err(PayloadError::CountMismatch {
                section: "species arrays",
                declared: species.x.len() as u64,
                actual: species.weight.len() as u64,
            });
        }
        check_count("species particles", *declared as usize, species.len())?;
    }
    for (declared, field) in header.field_len.iter().zip(&body.fields) {
        check_count("field data", *declared as usize, field.data.len())?;
        if !field.is_consistent() {
            return Err(PayloadError::CountMismatch {
                section: "field shape",
                declared: field.expected_len() as u64,
                actual: field.data.len() as u64,
            });
        }
    }
    for (declared, probe) in header.probe_len.iter().zip(&body.probes) {
        check_count("probe history", *declared as usize, probe.history.len())?;
    }
    Ok(())
}

fn check_count(section: &'static str, declared: usize, actual: usize) -> Result<(), PayloadError> {
    if declared != actual {
        return Err(PayloadError::CountMismatch {
            section,
            declared: declared as u64,
            actual: actual as u64,
        });
    }
    Ok(())
}
