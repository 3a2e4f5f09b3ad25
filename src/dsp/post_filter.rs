//! Output conditioning: optional one-pole smoothing plus a soft saturator.

use crate::dsp::utils::soft_saturate;

/// Upper bound for the post filter coefficient.
pub const POST_FILTER_MAX: f32 = 0.98;

#[derive(Clone, Copy, Debug, Default)]
pub struct PostConditioner {
    state: f32,
}

impl PostConditioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// `state = a * state + (1 - a) * x`. A strength of 0 is a no-op.
    pub fn smooth(&mut self, samples: &mut [f32], strength: f32) {
        let alpha = strength.clamp(0.0, POST_FILTER_MAX);
        if alpha <= 0.0 {
            return;
        }
        for s in samples.iter_mut() {
            self.state = alpha * self.state + (1.0 - alpha) * *s;
            *s = self.state;
        }
    }

    pub fn saturate(samples: &mut [f32]) {
        for s in samples.iter_mut() {
            *s = soft_saturate(*s);
        }
    }

    pub fn state(&self) -> f32 {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_strength_is_passthrough() {
        let mut pc = PostConditioner::new();
        let mut x = [0.3f32, -0.2, 0.9];
        pc.smooth(&mut x, 0.0);
        assert_eq!(x, [0.3, -0.2, 0.9]);
        assert_eq!(pc.state(), 0.0);
    }

    #[test]
    fn test_one_pole_step_response() {
        let mut pc = PostConditioner::new();
        let mut x = [1.0f32; 4];
        pc.smooth(&mut x, 0.5);
        assert!((x[0] - 0.5).abs() < 1e-6);
        assert!((x[1] - 0.75).abs() < 1e-6);
        assert!((x[3] - 0.9375).abs() < 1e-6);
    }

    #[test]
    fn test_strength_is_capped() {
        let mut pc = PostConditioner::new();
        let mut x = [1.0f32];
        pc.smooth(&mut x, 5.0);
        assert!((x[0] - (1.0 - POST_FILTER_MAX)).abs() < 1e-6);
    }

    #[test]
    fn test_saturator_never_exceeds_ceiling() {
        let mut x = [10.0f32, -10.0, 0.5];
        PostConditioner::saturate(&mut x);
        assert!(x[0] <= 0.98 && x[1] >= -0.98);
        assert!(x[2] < 0.5 && x[2] > 0.45);
    }
}
