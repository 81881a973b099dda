//! 进度上报与 CLI 进度条管理。

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::models::PageStatus;

#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressSnapshot {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub page_total: usize,
}

pub struct ProgressReporter {
    pub(crate) snapshot: ProgressSnapshot,
    pub(crate) cb: Option<Box<dyn FnMut(ProgressSnapshot) + Send>>, // optional UI callback
    cli: Option<ProgressBar>,
}

impl ProgressReporter {
    fn emit(&mut self) {
        if let Some(cb) = self.cb.as_mut() {
            cb(self.snapshot);
        }
    }

    pub(crate) fn record(&mut self, status: PageStatus) {
        match status {
            PageStatus::Downloaded => self.snapshot.downloaded += 1,
            PageStatus::SkippedExisting => self.snapshot.skipped += 1,
            PageStatus::NotFound | PageStatus::Unavailable => self.snapshot.failed += 1,
        }
        if let Some(bar) = self.cli.as_ref() {
            bar.inc(1);
        }
        self.emit();
    }

    pub(crate) fn finish(&mut self) {
        if let Some(bar) = self.cli.take() {
            bar.finish_and_clear();
        }
        self.emit();
    }
}

pub(crate) fn make_reporter(
    page_total: usize,
    progress: Option<Box<dyn FnMut(ProgressSnapshot) + Send>>,
) -> ProgressReporter {
    let use_cli_bar = progress.is_none() && page_total > 0;

    let cli = if use_cli_bar {
        let style = ProgressStyle::with_template(
            "{prefix} [{elapsed_precise}] {wide_bar} {pos}/{len} ({eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");

        let bar = ProgressBar::with_draw_target(
            Some(page_total as u64),
            ProgressDrawTarget::stderr(),
        );
        bar.set_style(style);
        bar.set_prefix("页面下载");
        Some(bar)
    } else {
        None
    };

    let mut reporter = ProgressReporter {
        snapshot: ProgressSnapshot {
            page_total,
            ..Default::default()
        },
        cb: progress,
        cli,
    };
    reporter.emit();
    reporter
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn callback_sees_every_update() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut reporter = make_reporter(
            2,
            Some(Box::new(move |snap| sink.lock().unwrap().push(snap))),
        );
        reporter.record(PageStatus::Downloaded);
        reporter.record(PageStatus::SkippedExisting);
        reporter.finish();

        let seen = seen.lock().unwrap();
        let last = seen.last().unwrap();
        assert_eq!(last.downloaded, 1);
        assert_eq!(last.skipped, 1);
        assert_eq!(last.failed, 0);
        assert_eq!(last.page_total, 2);
    }
}
