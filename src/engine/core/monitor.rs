// Encode-time monitor: warns once when compression can't keep up with the frame rate

use std::time::Duration;

use super::family::EncoderFamily;
use super::settings::ThreadType;
use crate::engine::backend::Capabilities;

/// Moving average window in frames
pub const WINDOW: u64 = 100;
/// Frames before the average is trusted
pub const WARMUP_FRAMES: u64 = 2 * WINDOW;
/// Frames after which monitoring stops even without a report
pub const MAX_OBSERVED_FRAMES: u64 = 10 * WINDOW;

/// What the monitor needs to know about the active context
#[derive(Debug, Clone, Copy)]
pub struct MonitorContext {
    pub family: EncoderFamily,
    pub capabilities: Capabilities,
    pub thread_type: ThreadType,
    pub thread_count: Option<usize>,
    /// The user passed `delay` explicitly
    pub user_delay: bool,
    pub fps: f64,
    pub source_rgb: bool,
    pub target_rgb: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceReport {
    pub average: Duration,
    pub budget: Duration,
    pub hint: Option<String>,
    pub conversion_hint: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PerformanceMonitor {
    avg_secs: f64,
    frames: u64,
    done: bool,
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start over for a new encoder context
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn average(&self) -> Duration {
        Duration::from_secs_f64(self.avg_secs)
    }

    /// Record one frame; returns a report the first time the budget is exceeded
    pub fn observe(
        &mut self,
        ctx: &MonitorContext,
        conversion: Duration,
        total: Duration,
    ) -> Option<PerformanceReport> {
        if self.done || self.frames >= MAX_OBSERVED_FRAMES {
            return None;
        }
        let window = WINDOW as f64;
        self.avg_secs = (self.avg_secs * (window - 1.0) + total.as_secs_f64()) / window;
        self.frames += 1;

        let budget = 1.0 / ctx.fps;
        if self.frames < WARMUP_FRAMES || self.avg_secs < budget {
            return None;
        }
        self.done = true;

        tracing::warn!(
            "Average compression time of last {} frames is {:.3} ms but time per frame is only {:.3} ms!",
            WINDOW,
            self.avg_secs * 1000.0,
            budget * 1000.0
        );
        let hint = throughput_hint(ctx);
        if let Some(hint) = &hint {
            tracing::warn!(
                "Consider adding {} to increase throughput at the expense of latency.",
                hint
            );
        }

        let conversion_hint = (ctx.source_rgb != ctx.target_rgb
            && conversion.as_secs_f64() > self.avg_secs / 4.0)
            .then(|| {
                format!(
                    "Pixel format conversion of the last frame took {:.3} ms; keep the source colour model (rgb/yuv) to avoid the colour space conversion.",
                    conversion.as_secs_f64() * 1000.0
                )
            });
        if let Some(hint) = &conversion_hint {
            tracing::warn!("{}", hint);
        }

        Some(PerformanceReport {
            average: self.average(),
            budget: Duration::from_secs_f64(budget),
            hint,
            conversion_hint,
        })
    }
}

fn throughput_hint(ctx: &MonitorContext) -> Option<String> {
    if ctx.family == EncoderFamily::Nvenc {
        return (!ctx.user_delay)
            .then(|| "\"delay=<frames>\" option to NVENC compression (2 suggested)".to_string());
    }
    if !ctx.thread_type.slice && ctx.capabilities.frame_threads {
        return Some(
            "\"threads=<n>FS\" option with small <n> or 0 (nr of logical cores) to compression"
                .to_string(),
        );
    }
    if ctx.thread_count == Some(1) && ctx.capabilities.other_threads {
        return Some(
            "\"threads=<n>\" option with small <n> or 0 (nr of logical cores) to compression"
                .to_string(),
        );
    }
    None
}
