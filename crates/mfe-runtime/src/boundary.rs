//! Error isolation boundary.
//!
//! Every call into module code (import, mount, unmount, cleanup) runs through
//! [`ErrorBoundary::guard`], which turns both `Err` returns and panics into a
//! [`ModuleError`]. Terminal failures are recorded as [`BoundaryReport`]s and
//! the surface is left showing [`SurfaceContent::Failed`], so one broken
//! module never takes the host or its sibling surfaces down.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tracing::{error, warn};

use crate::error::{ModuleError, ModuleResult};
use crate::surface::{MountSurface, SurfaceContent};

/// A contained failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoundaryReport {
    /// Failed module.
    pub module: String,
    /// Surface it was mounted on.
    pub surface: String,
    /// Error text.
    pub error: String,
    /// Whether a manual retry is offered.
    pub retryable: bool,
    /// Attempts made before giving up.
    pub attempts: u32,
    /// When the failure settled.
    pub timestamp: DateTime<Utc>,
}

/// Reports kept in memory; older ones are dropped first.
pub const MAX_REPORTS: usize = 256;

/// Callback invoked for every report.
pub type ErrorCallback = Arc<dyn Fn(&BoundaryReport) + Send + Sync>;

/// Catches module failures and records them.
#[derive(Default)]
pub struct ErrorBoundary {
    on_error: Option<ErrorCallback>,
    reports: Mutex<VecDeque<BoundaryReport>>,
}

impl ErrorBoundary {
    /// Boundary with no callback.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Boundary that also forwards each report to `callback`.
    #[must_use]
    pub fn with_callback(callback: impl Fn(&BoundaryReport) + Send + Sync + 'static) -> Self {
        Self {
            on_error: Some(Arc::new(callback)),
            reports: Mutex::new(VecDeque::new()),
        }
    }

    /// Run module code, converting a panic into [`ModuleError::Panicked`].
    ///
    /// # Errors
    ///
    /// Returns whatever `fut` returned, or `Panicked` if it panicked.
    pub async fn guard<T, F>(&self, module: &str, fut: F) -> ModuleResult<T>
    where
        F: Future<Output = ModuleResult<T>>,
    {
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(module, panic = %message, "Module panicked; contained by boundary");
                Err(ModuleError::Panicked {
                    module: module.to_string(),
                    message,
                })
            },
        }
    }

    /// Record a terminal failure and notify the callback.
    ///
    /// Only the latest [`MAX_REPORTS`] are retained. A panicking callback is
    /// logged and otherwise ignored.
    pub fn report(&self, report: BoundaryReport) {
        error!(
            module = %report.module,
            surface = %report.surface,
            attempts = report.attempts,
            retryable = report.retryable,
            error = %report.error,
            "Module failed; rendering fallback"
        );

        if let Some(callback) = &self.on_error {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| callback(&report)));
            if let Err(e) = result {
                warn!(
                    module = %report.module,
                    panic = %panic_message(e.as_ref()),
                    "Error callback panicked"
                );
            }
        }

        let mut reports = self.reports.lock().unwrap_or_else(PoisonError::into_inner);
        if reports.len() >= MAX_REPORTS {
            reports.pop_front();
        }
        reports.push_back(report);
    }

    /// Put `surface` into the failed fallback state.
    pub fn render_fallback(&self, surface: &dyn MountSurface, report: &BoundaryReport) {
        surface.render(SurfaceContent::Failed {
            module: report.module.clone(),
            error: report.error.clone(),
            retryable: report.retryable,
        });
    }

    /// Retained reports, oldest first.
    #[must_use]
    pub fn reports(&self) -> Vec<BoundaryReport> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// The most recent report.
    #[must_use]
    pub fn last_report(&self) -> Option<BoundaryReport> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .back()
            .cloned()
    }
}

impl fmt::Debug for ErrorBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorBoundary")
            .field("has_callback", &self.on_error.is_some())
            .field("reports", &self.reports().len())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
