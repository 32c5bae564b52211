/// Owns the progressive-accumulation epoch. The GPU compares each pixel's
/// stored epoch against the current one and restarts stale pixels; epoch 0
/// is never handed out so a zero-filled buffer reads as "never rendered".
#[derive(Debug, Clone)]
pub struct AccumulationController {
    epoch: u32,
    needs_reset: bool,
}

/// What the recorder needs from the controller for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccumulationFrame {
    pub epoch: u32,
    /// Accumulation buffers must be cleared before this frame's dispatch.
    pub reset: bool,
}

impl Default for AccumulationController {
    fn default() -> Self {
        Self::new()
    }
}

impl AccumulationController {
    /// Starts with a reset pending, so the first frame always renders fresh.
    pub fn new() -> Self {
        let mut controller = AccumulationController {
            epoch: 0,
            needs_reset: false,
        };
        controller.request_reset();
        controller
    }

    /// Bumps the epoch once per frame no matter how many callers ask.
    pub fn request_reset(&mut self) {
        if self.needs_reset {
            return;
        }
        self.epoch = self.epoch.wrapping_add(1);
        if self.epoch == 0 {
            self.epoch = 1;
        }
        self.needs_reset = true;
    }

    pub fn current_epoch(&self) -> u32 {
        self.epoch
    }

    pub fn needs_reset(&self) -> bool {
        self.needs_reset
    }

    /// Consumes the pending reset; call once per recorded frame.
    pub fn begin_frame(&mut self) -> AccumulationFrame {
        let reset = std::mem::take(&mut self.needs_reset);
        AccumulationFrame {
            epoch: self.epoch,
            reset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_frame_resets() {
        let mut acc = AccumulationController::new();
        assert_eq!(acc.current_epoch(), 1);
        assert_eq!(
            acc.begin_frame(),
            AccumulationFrame {
                epoch: 1,
                reset: true
            }
        );
        assert_eq!(
            acc.begin_frame(),
            AccumulationFrame {
                epoch: 1,
                reset: false
            }
        );
    }

    #[test]
    fn test_reset_idempotent_within_frame() {
        let mut acc = AccumulationController::new();
        acc.begin_frame();
        acc.request_reset();
        acc.request_reset();
        acc.request_reset();
        assert_eq!(acc.current_epoch(), 2);
        assert!(acc.needs_reset());
        assert!(acc.begin_frame().reset);
        assert!(!acc.needs_reset());
    }

    #[test]
    fn test_epoch_strictly_increases() {
        let mut acc = AccumulationController::new();
        let mut last = acc.current_epoch();
        for _ in 0..1000 {
            acc.begin_frame();
            acc.request_reset();
            let now = acc.current_epoch();
            assert!(now > last);
            assert_ne!(now, 0);
            last = now;
        }
    }

    #[test]
    fn test_epoch_wraps_past_zero() {
        let mut acc = AccumulationController {
            epoch: u32::MAX,
            needs_reset: false,
        };
        acc.request_reset();
        assert_eq!(acc.current_epoch(), 1);
        assert!(acc.begin_frame().reset);
    }
}
