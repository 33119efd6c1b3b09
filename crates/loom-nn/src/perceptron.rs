//! Fixed-weight perceptrons for the basic logic gates.
//!
//! A single threshold unit can express AND, NAND and OR. XOR is not
//! linearly separable and needs a second layer: `AND(NAND(x), OR(x))`.

/// Fires (returns 1) when `w . x + b > 0`.
pub fn threshold_unit(x: &[f64], w: &[f64], b: f64) -> u8 {
    assert_eq!(x.len(), w.len(), "threshold_unit: {} inputs for {} weights", x.len(), w.len());
    let activation: f64 = x.iter().zip(w).map(|(x, w)| x * w).sum::<f64>() + b;
    u8::from(activation > 0.0)
}

pub fn and(x: [f64; 2]) -> u8 {
    threshold_unit(&x, &[0.5, 0.5], -0.7)
}

pub fn nand(x: [f64; 2]) -> u8 {
    threshold_unit(&x, &[-0.5, -0.5], 0.7)
}

pub fn or(x: [f64; 2]) -> u8 {
    threshold_unit(&x, &[0.5, 0.5], -0.2)
}

pub fn xor(x: [f64; 2]) -> u8 {
    and([f64::from(nand(x)), f64::from(or(x))])
}
