use num_complex::Complex32;

pub fn zero_range(spectrum: &mut [Complex32], range: std::ops::Range<usize>) {
    spectrum[range].fill(Complex32::new(0.0, 0.0));
}

pub fn zero(spectrum: &mut [Complex32]) {
    let len = spectrum.len();
    zero_range(spectrum, 0..len);
}

pub fn add_range(dst: &mut [Complex32], src: &[Complex32], range: std::ops::Range<usize>) {
    for (d, s) in dst[range.clone()].iter_mut().zip(&src[range]) {
        *d += *s;
    }
}

pub fn add(dst: &mut [Complex32], src: &[Complex32]) {
    debug_assert_eq!(dst.len(), src.len());
    let len = dst.len().min(src.len());
    add_range(dst, src, 0..len);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_then_add_copies_source() {
        let mut dst: Vec<Complex32> = (0..16).map(|i| Complex32::new(i as f32, -1.0)).collect();
        let src: Vec<Complex32> = (0..16)
            .map(|i| Complex32::new(0.5 * i as f32, i as f32))
            .collect();
        zero(&mut dst);
        add(&mut dst, &src);
        assert_eq!(dst, src);
    }

    #[test]
    fn add_is_elementwise_complex() {
        let mut dst = vec![Complex32::new(1.0, 2.0); 3];
        let src = vec![Complex32::new(0.5, -2.0); 3];
        add(&mut dst, &src);
        assert!(dst.iter().all(|v| *v == Complex32::new(1.5, 0.0)));
    }
}
