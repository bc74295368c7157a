//! Terminal progress bars for long runs.
//!
//! A simulation shows a timeline bar that counts simulated days; a calibration shows a custom bar
//! that counts finished beta candidates. Only one bar is active at a time, and initializing a new
//! one replaces the previous one.
//!
//! ```ignore
//! init_timeline_progress_bar(parameters.simulation_window());
//! Simulation::new(&parameters, parameters.beta, parameters.simulation_window())
//!     .with_step_callback(update_timeline_progress)
//!     .run(&mut population, &mut rng)?;
//! ```
//!
//! Calibration candidates finish on worker threads, so updates are serialized here.

use std::sync::{Mutex, PoisonError};

use chrono::NaiveDate;
use progress_bar::{
    finalize_progress_bar, inc_progress_bar, init_progress_bar, set_progress_bar_action,
    set_progress_bar_progress, Color, Style,
};

use crate::log::{trace, warn};
use crate::parameters::DateWindow;

/// The window of the active timeline bar, if any.
static TIMELINE: Mutex<Option<DateWindow>> = Mutex::new(None);
static CUSTOM: Mutex<()> = Mutex::new(());

fn days_between(start: NaiveDate, end: NaiveDate) -> usize {
    usize::try_from((end - start).num_days()).unwrap_or(0)
}

/// Initializes a progress bar over the days of `window`.
pub fn init_timeline_progress_bar(window: DateWindow) {
    trace!(
        "initializing timeline progress bar from {} to {}",
        window.start,
        window.end
    );
    let mut timeline = TIMELINE.lock().unwrap_or_else(PoisonError::into_inner);
    *timeline = Some(window);
    init_progress_bar(days_between(window.start, window.end));
    set_progress_bar_action("Day", Color::Blue, Style::Bold);
}

/// Moves the timeline bar to `date`, finalizing it on the last day of the window.
pub fn update_timeline_progress(date: NaiveDate) {
    let mut timeline = TIMELINE.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(window) = *timeline else {
        warn!("attempted to update timeline progress bar before it was initialized");
        return;
    };
    let date = date.min(window.end);
    set_progress_bar_progress(days_between(window.start, date));
    if date == window.end {
        finalize_progress_bar();
        *timeline = None;
    }
}

/// Initializes a custom progress bar with the given label and max value.
pub fn init_custom_progress_bar(label: &str, max_value: usize) {
    trace!(
        "initializing custom progress bar with label {} and max value {}",
        label,
        max_value
    );
    let _guard = CUSTOM.lock().unwrap_or_else(PoisonError::into_inner);
    init_progress_bar(max_value);
    set_progress_bar_action(label, Color::Blue, Style::Bold);
}

/// Advances the custom progress bar by one.
pub fn increment_custom_progress() {
    let _guard = CUSTOM.lock().unwrap_or_else(PoisonError::into_inner);
    inc_progress_bar();
}

/// Completes the custom progress bar.
pub fn finalize_custom_progress() {
    let _guard = CUSTOM.lock().unwrap_or_else(PoisonError::into_inner);
    finalize_progress_bar();
}
