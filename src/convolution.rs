//! Convolution Engine: the complex matched filter applied by the Acoustic
//! Channel to a raw ping against a recorded transmit reference (spec §4,
//! "Convolution Engine").
//!
//! Holds a time-reversed, conjugated copy of the reference signal and
//! convolves an input ping against it in place, the classic matched-filter
//! construction (convolution with the reversed conjugate maximizes SNR at
//! the point of best alignment).

use num_complex::Complex32;

/// A matched filter built from one transmit reference signal.
#[derive(Debug, Clone)]
pub struct ConvolutionEngine {
    /// Time-reversed, conjugated reference kernel.
    kernel: Vec<Complex32>,
}

impl ConvolutionEngine {
    /// Build the engine from a reference signal. Reverses and conjugates
    /// it once up front so `convolve` can run a straight correlation.
    pub fn new(reference: &[Complex32]) -> Self {
        let kernel: Vec<Complex32> = reference.iter().rev().map(|c| c.conj()).collect();
        ConvolutionEngine { kernel }
    }

    /// Complex magnitude of the reference signal (pre-reversal); used by
    /// the Acoustic Channel to detect the "zero magnitude, single sample"
    /// convolution-disable marker (spec §3).
    pub fn reference_magnitude(reference: &[Complex32]) -> f32 {
        reference.iter().map(|c| c.norm()).sum()
    }

    pub fn kernel_len(&self) -> usize {
        self.kernel.len()
    }

    /// Convolve `input` with the matched-filter kernel, writing the full
    /// linear convolution (length `input.len() + kernel.len() - 1`) into
    /// `out`, truncated to `input.len()` samples to preserve ping length
    /// (the Acoustic Channel treats amplitude/quadrature traces as one
    /// sample per input sample).
    pub fn convolve_in_place(&self, input: &mut [Complex32]) {
        if self.kernel.is_empty() || input.is_empty() {
            return;
        }
        let n = input.len();
        let mut result = vec![Complex32::new(0.0, 0.0); n];
        for (i, result_slot) in result.iter_mut().enumerate() {
            let mut acc = Complex32::new(0.0, 0.0);
            // Causal correlation: kernel centered so the filter's last
            // tap aligns with the current sample, matching a running
            // matched-filter response rather than a full linear
            // convolution (which would shift the peak by kernel_len/2).
            let klen = self.kernel.len();
            for (k, &kv) in self.kernel.iter().enumerate() {
                let offset = klen - 1 - k;
                if offset <= i {
                    acc += input[i - offset] * kv;
                }
            }
            *result_slot = acc;
        }
        input.copy_from_slice(&result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_kernel_is_passthrough() {
        let reference = vec![Complex32::new(1.0, 0.0)];
        let engine = ConvolutionEngine::new(&reference);
        let mut input = vec![
            Complex32::new(1.0, 0.0),
            Complex32::new(2.0, 0.0),
            Complex32::new(3.0, 0.0),
        ];
        engine.convolve_in_place(&mut input);
        assert_eq!(input[0], Complex32::new(1.0, 0.0));
        assert_eq!(input[1], Complex32::new(2.0, 0.0));
        assert_eq!(input[2], Complex32::new(3.0, 0.0));
    }

    #[test]
    fn zero_length_reference_has_zero_magnitude() {
        let reference: Vec<Complex32> = vec![Complex32::new(0.0, 0.0)];
        assert!(ConvolutionEngine::reference_magnitude(&reference) < 1e-7);
    }

    #[test]
    fn two_tap_matched_filter_peaks_at_alignment() {
        // Reference is a two-sample chirp-like pulse; the matched response
        // should peak where the input best matches the (reversed,
        // conjugated) reference.
        let reference = vec![Complex32::new(1.0, 0.0), Complex32::new(1.0, 0.0)];
        let engine = ConvolutionEngine::new(&reference);
        let mut input = vec![
            Complex32::new(0.0, 0.0),
            Complex32::new(1.0, 0.0),
            Complex32::new(1.0, 0.0),
            Complex32::new(0.0, 0.0),
        ];
        engine.convolve_in_place(&mut input);
        assert_eq!(input[2], Complex32::new(2.0, 0.0));
    }
}
