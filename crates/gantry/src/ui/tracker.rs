use std::sync::{Arc, Mutex, PoisonError};

use gantry_progress::{Progress, ProgressChannel, Step};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use once_cell::sync::Lazy;

const BYTES_STYLE: &str = "{spinner:.blue} {prefix:>12.cyan.bold} [{elapsed_precise}] {wide_bar:.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}";

const COUNT_STYLE: &str = "{spinner:.blue} {prefix:>12.cyan.bold} [{elapsed_precise}] {wide_bar:.cyan/blue} {pos}/{len} {msg}";

const SPINNER_STYLE: &str = "{spinner:.blue} {prefix:>12.cyan.bold} [{elapsed_precise}] {msg}";

const TICK: &str = "⠁⠂⠄⡀⢀⠠⠐⠈ ";

const PB_CHARS: &str = "█▓▒░  ";

fn style(template: &str) -> Option<ProgressStyle> {
    ProgressStyle::with_template(template)
        .ok()
        .map(|s| s.tick_chars(TICK).progress_chars(PB_CHARS))
}

static BYTES_TEMPLATE: Lazy<Option<ProgressStyle>> = Lazy::new(|| style(BYTES_STYLE));
static COUNT_TEMPLATE: Lazy<Option<ProgressStyle>> = Lazy::new(|| style(COUNT_STYLE));
static SPINNER_TEMPLATE: Lazy<Option<ProgressStyle>> = Lazy::new(|| style(SPINNER_STYLE));

/// One terminal progress bar per [`ProgressChannel`].
#[derive(Clone, Default)]
pub struct ChannelTracker {
    multi: MultiProgress,
    bars:  Arc<Mutex<Vec<ProgressBar>>>,
}

impl ChannelTracker {
    pub fn new() -> Self { Self::default() }

    /// Add a bar for `channel` and keep it in sync with every update.
    pub fn track(&self, channel: &ProgressChannel) {
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_message(channel.file_identifier().to_owned());
        render(&bar, channel);
        self.bars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(bar.clone());

        channel.subscribe(move |c| render(&bar, c));
    }

    /// Stop every bar; ones that never completed are left as they are.
    pub fn finish(&self) {
        for bar in self.bars.lock().unwrap_or_else(PoisonError::into_inner).iter() {
            if !bar.is_finished() {
                bar.abandon();
            }
        }
    }
}

fn render(bar: &ProgressBar, channel: &ProgressChannel) {
    let step = channel.step();
    bar.set_prefix(step.name());

    let template = match (step, channel.progress()) {
        (_, Progress::Indeterminate) => &SPINNER_TEMPLATE,
        (Step::Extracting, _) => &COUNT_TEMPLATE,
        _ => &BYTES_TEMPLATE,
    };
    if let Some(style) = template.as_ref() {
        bar.set_style(style.clone());
    }

    match channel.progress() {
        Progress::Indeterminate => bar.tick(),
        Progress::Unbounded { current } => bar.set_position(current),
        Progress::Known { current, total } => {
            bar.set_length(total);
            bar.set_position(current);
            if step == Step::Processing && current >= total {
                bar.finish();
            }
        }
    }
}
