use indicatif::{ProgressBar, ProgressDrawTarget, ProgressState, ProgressStyle};
use molparam::data::progress::{Progress, ProgressCallback, ProgressReporter};
use std::sync::{Arc, Mutex};

/// Renders dataset loading events as one progress bar per directory.
#[derive(Clone)]
pub struct CliProgressHandler {
    pb: Arc<Mutex<ProgressBar>>,
}

impl CliProgressHandler {
    pub fn new() -> Self {
        Self::with_draw_target(ProgressDrawTarget::stderr())
    }

    pub fn with_draw_target(target: ProgressDrawTarget) -> Self {
        let pb = ProgressBar::with_draw_target(Some(0), target).with_style(Self::bar_style());
        pb.finish_and_clear();
        Self {
            pb: Arc::new(Mutex::new(pb)),
        }
    }

    pub fn reporter(&self) -> ProgressReporter<'static> {
        ProgressReporter::with_callback(self.callback())
    }

    pub fn callback(&self) -> ProgressCallback<'static> {
        let pb = self.pb.clone();

        Box::new(move |progress: Progress| {
            let Ok(mut pb) = pb.lock() else {
                return;
            };

            match progress {
                Progress::LoadStart {
                    subdataset,
                    total_files,
                } => {
                    *pb = ProgressBar::with_draw_target(Some(total_files), pb_target(&pb))
                        .with_style(Self::bar_style())
                        .with_message(subdataset);
                }
                Progress::FileLoaded { .. } => pb.inc(1),
                Progress::LoadFinish { loaded } => {
                    pb.finish_with_message(format!("✓ {} records", loaded));
                }
                Progress::Message(msg) => pb.println(format!("  {}", msg)),
            }
        })
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::with_template("{msg:<20} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .with_key("eta", |state: &ProgressState, w: &mut dyn std::fmt::Write| {
                let _ = write!(w, "{:.1}s", state.eta().as_secs_f64());
            })
            .progress_chars("##-")
    }
}

fn pb_target(pb: &ProgressBar) -> ProgressDrawTarget {
    if pb.is_hidden() {
        ProgressDrawTarget::hidden()
    } else {
        ProgressDrawTarget::stderr()
    }
}

impl Default for CliProgressHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::thread;

    fn hidden() -> CliProgressHandler {
        CliProgressHandler::with_draw_target(ProgressDrawTarget::hidden())
    }

    #[test]
    fn handler_starts_finished_and_empty() {
        let handler = hidden();
        let pb = handler.pb.lock().unwrap();
        assert_eq!(pb.length(), Some(0));
        assert!(pb.is_finished());
    }

    #[test]
    fn load_events_drive_the_bar() {
        let handler = hidden();
        let reporter = handler.reporter();

        reporter.report(Progress::LoadStart {
            subdataset: "spice".to_string(),
            total_files: 3,
        });
        {
            let pb = handler.pb.lock().unwrap();
            assert_eq!(pb.length(), Some(3));
            assert_eq!(pb.message(), "spice");
            assert!(!pb.is_finished());
        }

        reporter.report(Progress::FileLoaded {
            path: PathBuf::from("a.npz"),
        });
        reporter.report(Progress::FileLoaded {
            path: PathBuf::from("b.npz"),
        });
        assert_eq!(handler.pb.lock().unwrap().position(), 2);

        reporter.report(Progress::LoadFinish { loaded: 2 });
        let pb = handler.pb.lock().unwrap();
        assert!(pb.is_finished());
        assert_eq!(pb.message(), "✓ 2 records");
    }

    #[test]
    fn callback_can_be_driven_from_worker_threads() {
        let handler = hidden();
        let callback = Arc::new(handler.callback());
        callback(Progress::LoadStart {
            subdataset: "gas".to_string(),
            total_files: 8,
        });

        let workers: Vec<_> = (0..4)
            .map(|i| {
                let callback = callback.clone();
                thread::spawn(move || {
                    for j in 0..2 {
                        callback(Progress::FileLoaded {
                            path: PathBuf::from(format!("{}-{}.npz", i, j)),
                        });
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(handler.pb.lock().unwrap().position(), 8);
    }
}
