use std::path::PathBuf;

/// Events emitted while a dataset directory is read.
#[derive(Debug, Clone)]
pub enum Progress {
    LoadStart { subdataset: String, total_files: u64 },
    /// Emitted from worker threads, in completion order.
    FileLoaded { path: PathBuf },
    LoadFinish { loaded: usize },

    Message(String),
}

pub type ProgressCallback<'a> = Box<dyn Fn(Progress) + Send + Sync + 'a>;

/// Forwards [`Progress`] events to an optional callback.
#[derive(Default)]
pub struct ProgressReporter<'a> {
    callback: Option<ProgressCallback<'a>>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(callback: ProgressCallback<'a>) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    #[inline]
    pub fn report(&self, event: Progress) {
        if let Some(callback) = &self.callback {
            callback(event);
        }
    }
}
