//! Progress reporting for the long-running map builds.

/// Caller-supplied progress callbacks. `init` fires when an axis resize
/// starts, `update` at most once per `update_step` fraction of the work,
/// `end` when the axis completes.
pub struct Progress {
    on_init: Option<Box<dyn FnMut(&str) + Send>>,
    on_update: Option<Box<dyn FnMut(f64) + Send>>,
    on_end: Option<Box<dyn FnMut(&str) + Send>>,
    pub init_width_message: String,
    pub init_height_message: String,
    pub end_width_message: String,
    pub end_height_message: String,
    /// Fraction of the total work between two `update` calls, in (0, 1].
    pub update_step: f64,
}

impl Default for Progress {
    fn default() -> Progress {
        Progress {
            on_init: None,
            on_update: None,
            on_end: None,
            init_width_message: "resizing width".to_string(),
            init_height_message: "resizing height".to_string(),
            end_width_message: "done".to_string(),
            end_height_message: "done".to_string(),
            update_step: 0.02,
        }
    }
}

impl Progress {
    pub fn new() -> Progress {
        Progress::default()
    }

    pub fn set_init<F: FnMut(&str) + Send + 'static>(&mut self, f: F) {
        self.on_init = Some(Box::new(f));
    }

    pub fn set_update<F: FnMut(f64) + Send + 'static>(&mut self, f: F) {
        self.on_update = Some(Box::new(f));
    }

    pub fn set_end<F: FnMut(&str) + Send + 'static>(&mut self, f: F) {
        self.on_end = Some(Box::new(f));
    }

    pub fn set_update_step(&mut self, step: f64) {
        self.update_step = step.max(f64::EPSILON).min(1.0);
    }

    pub(crate) fn fire_init(&mut self, msg: &str) {
        if let Some(f) = &mut self.on_init {
            f(msg);
        }
    }

    pub(crate) fn fire_update(&mut self, fraction: f64) {
        if let Some(f) = &mut self.on_update {
            f(fraction.max(0.0).min(1.0));
        }
    }

    pub(crate) fn fire_end(&mut self, msg: &str) {
        if let Some(f) = &mut self.on_end {
            f(msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn callbacks_fire_when_set() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let mut p = Progress::new();
        p.set_update(move |f| {
            assert!((0.0..=1.0).contains(&f));
            c.fetch_add(1, Ordering::SeqCst);
        });
        p.fire_update(0.5);
        p.fire_update(2.0); // clamped
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn silent_without_callbacks() {
        let mut p = Progress::new();
        p.fire_init("x");
        p.fire_update(0.1);
        p.fire_end("y");
    }

    #[test]
    fn update_step_is_clamped() {
        let mut p = Progress::new();
        p.set_update_step(7.0);
        assert_eq!(p.update_step, 1.0);
        p.set_update_step(0.0);
        assert!(p.update_step > 0.0);
    }
}
