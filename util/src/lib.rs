use num::complex::Complex64;

/// Poor man's approx assertion for complex-valued arrays and vectors.
///
/// Both sides are iterated element by element, so anything whose reference iterates over
/// `&Complex64` (ndarray arrays and views, nalgebra vectors, slices) can be compared.
#[macro_export]
macro_rules! assert_approx_array_eq {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        let max_absdiff = $crate::max_abs_diff(&$x, &$y);
        let approx_eq = max_absdiff <= $tol;

        if !approx_eq {
            println!("abstol: {:e}", $tol);
            println!("left: {:?}", $x);
            println!("right: {:?}", $y);
            println!("max abs diff: {:e}", max_absdiff);
        }
        assert!(approx_eq);
    }};
}

#[macro_export]
macro_rules! assert_panics {
    ($e:expr) => {{
        use std::panic::catch_unwind;
        use std::stringify;
        let expr_string = stringify!($e);
        let result = catch_unwind(|| $e);
        if result.is_ok() {
            panic!("assert_panics!({}) failed.", expr_string);
        }
    }};
}

/// Maximum absolute element-wise difference between two complex sequences.
///
/// # Panics
///
/// Panics if the sequences have different lengths.
pub fn max_abs_diff<'a, A, B>(a: A, b: B) -> f64
where
    A: IntoIterator<Item = &'a Complex64>,
    B: IntoIterator<Item = &'a Complex64>,
{
    let a: Vec<_> = a.into_iter().collect();
    let b: Vec<_> = b.into_iter().collect();
    assert_eq!(a.len(), b.len(), "Sequences must have the same number of elements.");
    a.iter()
        .zip(&b)
        .map(|(x, y)| (**x - **y).norm())
        .fold(0.0, f64::max)
}

/// Maximum absolute value of the imaginary parts in a complex sequence.
pub fn max_imag<'a>(a: impl IntoIterator<Item = &'a Complex64>) -> f64 {
    a.into_iter().map(|z| z.im.abs()).fold(0.0, f64::max)
}
