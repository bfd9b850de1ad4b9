use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use num_traits::Zero;
use rustfft::{Fft, FftDirection, FftNum, FftPlanner, num_complex::Complex};

/// Plans keyed by length and direction, with a pool of scratch buffers so
/// repeated ring transforms do not reallocate.
pub struct FftCache<T: FftNum> {
    planner: Mutex<FftPlanner<T>>,
    plans: Mutex<HashMap<(usize, bool), Arc<dyn Fft<T>>>>,
    scratch: Mutex<Vec<Vec<Complex<T>>>>,
}

impl<T: FftNum> Default for FftCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: FftNum> FftCache<T> {
    pub fn new() -> Self {
        Self {
            planner: Mutex::new(FftPlanner::new()),
            plans: Mutex::new(HashMap::new()),
            scratch: Mutex::new(vec![]),
        }
    }
    pub fn plan(&self, len: usize, direction: FftDirection) -> Arc<dyn Fft<T>> {
        let key = (len, direction == FftDirection::Forward);
        let mut plans = self.plans.lock().unwrap_or_else(|e| e.into_inner());
        plans
            .entry(key)
            .or_insert_with(|| {
                let mut planner = self.planner.lock().unwrap_or_else(|e| e.into_inner());
                planner.plan_fft(len, direction)
            })
            .clone()
    }
    fn alloc_scratch(&self, len: usize) -> Vec<Complex<T>> {
        let pool = &mut *self.scratch.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut ret) = pool.pop() {
            ret.resize(len, Complex::zero());
            ret
        } else {
            vec![Complex::zero(); len]
        }
    }
    fn retain_scratch(&self, s: Vec<Complex<T>>) {
        self.scratch
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(s);
    }
    /// Unnormalised in-place transform: `X_k = sum_j x_j e^{-+2 pi i jk / n}`.
    pub fn process(&self, data: &mut [Complex<T>], direction: FftDirection) {
        if data.len() <= 1 {
            return;
        }
        let plan = self.plan(data.len(), direction);
        let mut scratch = self.alloc_scratch(plan.get_inplace_scratch_len());
        plan.process_with_scratch(data, &mut scratch);
        self.retain_scratch(scratch);
    }
}
