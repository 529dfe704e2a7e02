//! Synthetic diffraction patterns for tests.
use crate::arrayops::gridspace;
use crate::library::{PhaseInfo, ReferenceLibrary};
use crate::sample::Sample;

const BASELINE: f64 = 20.0;

const QUARTZ_PEAKS: [(f64, f64); 9] = [
    (20.86, 350.0),
    (26.64, 1000.0),
    (36.54, 80.0),
    (39.47, 80.0),
    (42.46, 60.0),
    (45.80, 40.0),
    (50.14, 140.0),
    (54.87, 40.0),
    (59.96, 90.0),
];

const CALCITE_PEAKS: [(f64, f64); 8] = [
    (23.06, 120.0),
    (29.41, 1000.0),
    (35.97, 140.0),
    (39.40, 180.0),
    (43.15, 150.0),
    (47.50, 170.0),
    (48.50, 170.0),
    (57.40, 80.0),
];

/// 10 to 60 degrees in 0.1 degree steps
pub fn axis() -> Vec<f64> {
    gridspace(10.0, 60.0, 0.1)
}

pub fn gaussian(x: f64, center: f64, sigma: f64, height: f64) -> f64 {
    height * (-0.5 * ((x - center) / sigma).powi(2)).exp()
}

fn peaks(tth: &[f64], peaks: &[(f64, f64)], sigma: f64) -> Vec<f64> {
    tth.iter()
        .map(|x| {
            BASELINE
                + peaks
                    .iter()
                    .map(|(c, h)| gaussian(*x, *c, sigma, *h))
                    .sum::<f64>()
        })
        .collect()
}

pub fn quartz(tth: &[f64]) -> Vec<f64> {
    peaks(tth, &QUARTZ_PEAKS, 0.12)
}

pub fn calcite(tth: &[f64]) -> Vec<f64> {
    peaks(tth, &CALCITE_PEAKS, 0.12)
}

/// Broad humps with no sharp reflections
pub fn organic(tth: &[f64]) -> Vec<f64> {
    tth.iter()
        .map(|x| BASELINE + gaussian(*x, 21.0, 3.0, 300.0) + gaussian(*x, 43.0, 4.0, 120.0))
        .collect()
}

/// Quartz (RIR 1.0) and an organic phase (RIR 0.5)
pub fn two_phase_library() -> ReferenceLibrary {
    let tth = axis();
    ReferenceLibrary::new(
        tth.clone(),
        vec![
            ("QUARTZ".to_string(), quartz(&tth)),
            ("ORGANIC".to_string(), organic(&tth)),
        ],
        vec![
            PhaseInfo::new("QUARTZ", "Quartz", 1.0),
            PhaseInfo::new("ORGANIC", "Organic", 0.5),
        ],
    )
    .unwrap()
}

/// [`two_phase_library`] plus calcite (RIR 2.0)
pub fn library() -> ReferenceLibrary {
    let tth = axis();
    ReferenceLibrary::new(
        tth.clone(),
        vec![
            ("QUARTZ".to_string(), quartz(&tth)),
            ("ORGANIC".to_string(), organic(&tth)),
            ("CALCITE".to_string(), calcite(&tth)),
        ],
        vec![
            PhaseInfo::new("QUARTZ", "Quartz", 1.0),
            PhaseInfo::new("ORGANIC", "Organic", 0.5),
            PhaseInfo::new("CALCITE", "Calcite", 2.0),
        ],
    )
    .unwrap()
}

/// Deterministic uniform noise in `[-amplitude, amplitude)`
pub fn noise(len: usize, amplitude: f64, seed: u64) -> Vec<f64> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let u = (state >> 11) as f64 / (1u64 << 53) as f64;
            amplitude * (2.0 * u - 1.0)
        })
        .collect()
}

/// Mix library patterns by mass fraction.
///
/// A phase's intensity contribution is its mass fraction scaled by its RIR relative
/// to `std`, so that quantifying against `std` recovers the mass fractions.
pub fn mass_mixture(
    library: &ReferenceLibrary,
    std: &str,
    fractions: &[(&str, f64)],
    noise_amplitude: f64,
) -> Sample {
    let std_rir = library.rir_of(std).unwrap();
    let n = library.tth().len();
    let mut counts = noise(n, noise_amplitude, 42);
    for (phase_id, w) in fractions {
        let weight = w * library.rir_of(phase_id).unwrap() / std_rir;
        for (acc, v) in counts.iter_mut().zip(library.column(phase_id).unwrap()) {
            *acc += weight * v;
        }
    }
    Sample::new(library.tth().to_vec(), counts).unwrap()
}
