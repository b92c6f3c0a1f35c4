/// Logistic sigmoid `1 / (1 + e^{-x})`, evaluated without overflow for large `|x|`.
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// `log(1 + e^{x})`.
#[inline]
pub fn softplus(x: f64) -> f64 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

/// `log(y!) = lnΓ(y + 1)` for `y ≥ 0`. Small integer counts use the exact
/// product; everything else uses the Stirling series, shifted up with
/// `Γ(z + 1) = z·Γ(z)` until it is accurate.
pub fn log_factorial(y: f64) -> f64 {
    if y.fract() == 0.0 && y < 32.0 {
        let mut acc = 0.0;
        let mut k = 2.0;
        while k <= y {
            acc += f64::ln(k);
            k += 1.0;
        }
        return acc;
    }
    let mut n = y + 1.0;
    let mut shift = 0.0;
    while n < 12.0 {
        shift += n.ln();
        n += 1.0;
    }
    // Stirling series for ln Γ(n).
    let inv = 1.0 / n;
    let inv2 = inv * inv;
    (n - 0.5) * n.ln() - n + 0.5 * (2.0 * std::f64::consts::PI).ln()
        + inv * (1.0 / 12.0 - inv2 * (1.0 / 360.0 - inv2 / 1260.0))
        - shift
}
