//! Shared fixtures for unit tests.

use crate::observation::RawObservation;

const REFERENCE: [f64; 35] = [
    2.00, 4.20, 4.62, 5.00, 5.00, 5.50, 5.57, 5.66, 5.75, 5.86, 6.65, 6.78, 6.79, 7.50, 7.50, 7.50,
    8.63, 8.71, 8.99, 9.50, 9.50, 9.85, 10.82, 11.00, 11.25, 11.25, 12.20, 14.92, 16.77, 17.81,
    19.16, 19.19, 19.64, 20.18, 22.97,
];

const REFERENCE_NON_DETECTS: [usize; 7] = [3, 4, 5, 8, 19, 20, 23];

/// The 35-point reference sample: values (detection limits for
/// non-detects) and censoring flags.
pub(crate) fn reference_values() -> (Vec<f64>, Vec<bool>) {
    let censored = (0..REFERENCE.len())
        .map(|i| REFERENCE_NON_DETECTS.contains(&i))
        .collect();
    (REFERENCE.to_vec(), censored)
}

/// Reference rows with `"ND"` / `"="` qualifiers, each value shifted by
/// `offset`. Row `i` is keyed `"i"`.
pub(crate) fn reference_rows(offset: f64) -> Vec<RawObservation> {
    let (values, censored) = reference_values();
    values
        .iter()
        .zip(&censored)
        .enumerate()
        .map(|(i, (&v, &c))| RawObservation::new(i.to_string(), v + offset, if c { "ND" } else { "=" }))
        .collect()
}
