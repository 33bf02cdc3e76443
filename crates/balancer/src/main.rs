//! Demo driver: a synthetic decomposed run on an in-memory process
//! group, showing rebalance and migration activity under a skewed
//! particle distribution.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::thread;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use balancer::{channel_group, DiagValue, Process, ReduceOp, RunConfig};
use patches::{FieldGrid, FieldKind, Patch, ParticleArrays, Probe};

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "balancer=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => match RunConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("failed to load config: {e}");
                std::process::exit(1);
            }
        },
        None => RunConfig {
            name: "demo".to_string(),
            grid_order: 3,
            process_count: 4,
            capabilities: None,
            rebalance_every: 10,
            improvement_threshold: 0.02,
            cost_floor: 1e-9,
            max_timesteps: Some(50),
        },
    };
    let steps = config.max_timesteps.unwrap_or(50);
    tracing::info!(
        name = %config.name,
        processes = config.process_count,
        grid_order = config.grid_order,
        steps,
        "starting synthetic run"
    );

    let group = channel_group(config.process_count);
    let results: Arc<Mutex<Vec<Option<(usize, usize)>>>> =
        Arc::new(Mutex::new(vec![None; config.process_count]));
    let initial_particles = Arc::new(Mutex::new(0usize));

    let mut handles = Vec::new();
    for endpoint in group {
        let config = config.clone();
        let results = Arc::clone(&results);
        let initial_particles = Arc::clone(&initial_particles);
        handles.push(thread::spawn(move || {
            let rank = endpoint.rank();
            let mut process = Process::new(endpoint, &config).expect("valid config");

            // Skewed initial load: particle count grows with hindex, so
            // the high end of the curve is heavier.
            process.seed_owned(|hindex, coords| seed_patch(hindex, coords));
            *initial_particles.lock().unwrap() += process.store().total_particles();

            process.register_diagnostic("particles_total", ReduceOp::Sum);
            process.register_diagnostic("patch_cost_max", ReduceOp::Max);

            let mut migrations = 0usize;
            for _ in 0..steps {
                let outcome = process
                    .step(|patch| {
                        // Synthetic kernel: cost proportional to the
                        // particle population.
                        patch.particle_count() as f64 * 1e-6
                    })
                    .expect("step failed");
                if let Some(report) = outcome.migration {
                    migrations += report.sent + report.received;
                }
            }

            let mut values = BTreeMap::new();
            values.insert(
                "particles_total".to_string(),
                DiagValue::Scalar(process.store().total_particles() as f64),
            );
            let max_cost = process
                .store()
                .iter()
                .map(|p| p.particle_count() as f64 * 1e-6)
                .fold(0.0, f64::max);
            values.insert("patch_cost_max".to_string(), DiagValue::Scalar(max_cost));
            let reduced = process.reduce_diagnostics(&values).expect("reduction failed");

            if rank == 0 {
                tracing::info!(?reduced, "global diagnostics");
            }
            tracing::info!(
                rank,
                patches = process.store().len(),
                particles = process.store().total_particles(),
                migrations,
                "process finished"
            );
            results.lock().unwrap()[rank] =
                Some((process.store().len(), process.store().total_particles()));
        }));
    }

    for handle in handles {
        handle.join().expect("process thread panicked");
    }

    let results = results.lock().unwrap();
    let final_particles: usize = results.iter().map(|r| r.expect("missing result").1).sum();
    let initial = *initial_particles.lock().unwrap();
    tracing::info!(
        initial_particles = initial,
        final_particles,
        "run complete; particle count {}",
        if initial == final_particles { "conserved" } else { "NOT conserved" }
    );
}

/// Build a synthetic patch whose population grows with its hindex.
fn seed_patch(hindex: u64, coords: (u64, u64)) -> Patch {
    let mut patch = Patch::new(hindex, coords);
    let mut electrons = ParticleArrays::new();
    for i in 0..(hindex + 1) * 4 {
        electrons.push_particle(
            coords.0 as f64 + 0.1 * (i % 10) as f64,
            coords.1 as f64 + 0.1 * (i / 10) as f64,
            [0.0, 0.0, 0.0],
            1.0,
            -1.0,
        );
    }
    patch.species.push(electrons);
    patch.fields.push(FieldGrid::zeros("Ex", 8, 8, 2, FieldKind::Real));
    patch.fields.push(FieldGrid::zeros("Rho", 8, 8, 2, FieldKind::Real));
    if hindex % 16 == 0 {
        patch.probes.push(Probe::new([coords.0 as f64, coords.1 as f64]));
    }
    patch
}
