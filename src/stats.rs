//! Pure statistics helpers used by feature extraction.
//!
//! Every function is total over its input: empty sequences yield 0 rather
//! than NaN so callers never need to guard.

/// Shannon entropy (base 2) over the character distribution of `s`.
pub fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq = std::collections::HashMap::new();
    let mut length = 0usize;
    for c in s.chars() {
        *freq.entry(c).or_insert(0usize) += 1;
        length += 1;
    }

    let length = length as f64;
    freq.values().fold(0.0, |entropy, &count| {
        let p = count as f64 / length;
        entropy - p * p.log2()
    })
}

/// Number of `.` separators in a domain name.
pub fn subdomain_depth(s: &str) -> usize {
    s.chars().filter(|&c| c == '.').count()
}

pub fn min(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().copied().fold(f64::INFINITY, f64::min)
    }
}

pub fn max(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Population standard deviation (divisor `n`, not `n - 1`).
pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Round to `decimals` places, half away from zero.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let ratio = 10f64.powi(decimals as i32);
    (value * ratio).round() / ratio
}
