//! Sliding-window majority filter that debounces the noisy per-frame
//! on-duty boolean.

use std::collections::VecDeque;

pub struct StatusWindow {
    history: VecDeque<bool>,
    capacity: usize,
    ratio_threshold: f64,
}

impl StatusWindow {
    pub fn new(capacity: usize, ratio_threshold: f64) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            ratio_threshold,
        }
    }

    /// Records one frame's verdict and returns the smoothed boolean. The
    /// ratio is computed over the current history length, so the window is
    /// more volatile during warm-up.
    pub fn push(&mut self, on_duty: bool) -> bool {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(on_duty);
        self.smoothed()
    }

    pub fn smoothed(&self) -> bool {
        if self.history.is_empty() {
            return false;
        }
        let positives = self.history.iter().filter(|v| **v).count();
        positives as f64 / self.history.len() as f64 >= self.ratio_threshold
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_over_current_length() {
        let mut window = StatusWindow::new(10, 0.6);
        // 3 trues then 2 falses: 3/5 = 0.6 >= 0.6.
        for _ in 0..3 {
            window.push(true);
        }
        window.push(false);
        let smoothed = window.push(false);
        assert!(smoothed);

        // One more false: 3/6 = 0.5 < 0.6.
        assert!(!window.push(false));
    }

    #[test]
    fn empty_window_is_off_duty() {
        let window = StatusWindow::new(10, 0.6);
        assert!(!window.smoothed());
    }

    #[test]
    fn capacity_is_bounded() {
        let mut window = StatusWindow::new(4, 0.5);
        for _ in 0..100 {
            window.push(true);
        }
        assert_eq!(window.len(), 4);

        // Old entries are evicted: 4 falses fully displace the trues.
        for _ in 0..4 {
            window.push(false);
        }
        assert!(!window.smoothed());
        assert_eq!(window.len(), 4);
    }

    #[test]
    fn reset_clears_history() {
        let mut window = StatusWindow::new(5, 0.6);
        window.push(true);
        window.push(true);
        window.reset();
        assert!(window.is_empty());
        assert!(!window.smoothed());
    }
}
