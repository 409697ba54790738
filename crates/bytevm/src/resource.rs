//! Resource limits for bytecode execution.
//!
//! The VM reports frame pushes and executed instructions to a [`ResourceTracker`].
//! With [`NoLimitTracker`] (the default) every check is an inlined no-op.

use std::time::{Duration, Instant};

use thiserror::Error;

/// Default ceiling on call-stack depth used by [`ResourceLimits::new`].
///
/// Deep enough for 10 000 nested calls: frames live on the heap, not the native stack.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 100_000;

/// A limit that was exceeded. Always fatal: handler code cannot catch it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("maximum recursion depth exceeded ({limit} frames)")]
    Recursion { limit: usize },
    #[error("instruction limit exceeded ({limit} instructions)")]
    Instructions { limit: u64 },
    #[error("time limit exceeded ({limit:?})")]
    Time { limit: Duration },
}

/// Hook invoked by the VM as execution proceeds.
pub trait ResourceTracker {
    /// Called before a frame is pushed; `depth` is the call-stack size after the push.
    fn on_frame_push(&mut self, depth: usize) -> Result<(), ResourceError>;

    /// Called before every instruction.
    fn on_instruction(&mut self) -> Result<(), ResourceError>;
}

/// Tracker that imposes no limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLimitTracker;

impl ResourceTracker for NoLimitTracker {
    #[inline]
    fn on_frame_push(&mut self, _depth: usize) -> Result<(), ResourceError> {
        Ok(())
    }

    #[inline]
    fn on_instruction(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }
}

/// Limits enforced by [`LimitedTracker`], built with chained setters.
///
/// ```
/// use std::time::Duration;
/// use bytevm::ResourceLimits;
///
/// let limits = ResourceLimits::new()
///     .max_recursion_depth(500)
///     .max_instructions(1_000_000)
///     .max_duration(Duration::from_secs(2));
/// assert_eq!(limits.recursion_depth(), Some(500));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    max_recursion_depth: Option<usize>,
    max_instructions: Option<u64>,
    max_duration: Option<Duration>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceLimits {
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_recursion_depth: Some(DEFAULT_MAX_RECURSION_DEPTH),
            max_instructions: None,
            max_duration: None,
        }
    }

    #[must_use]
    pub fn max_recursion_depth(mut self, depth: usize) -> Self {
        self.max_recursion_depth = Some(depth);
        self
    }

    #[must_use]
    pub fn max_instructions(mut self, count: u64) -> Self {
        self.max_instructions = Some(count);
        self
    }

    #[must_use]
    pub fn max_duration(mut self, duration: Duration) -> Self {
        self.max_duration = Some(duration);
        self
    }

    #[must_use]
    pub fn recursion_depth(&self) -> Option<usize> {
        self.max_recursion_depth
    }
}

/// Tracker enforcing a [`ResourceLimits`] configuration.
///
/// The clock starts when the tracker is created.
#[derive(Debug, Clone)]
pub struct LimitedTracker {
    limits: ResourceLimits,
    instructions: u64,
    started: Instant,
}

impl LimitedTracker {
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            instructions: 0,
            started: Instant::now(),
        }
    }

    /// Number of instructions executed so far.
    #[must_use]
    pub fn instructions(&self) -> u64 {
        self.instructions
    }
}

impl ResourceTracker for LimitedTracker {
    fn on_frame_push(&mut self, depth: usize) -> Result<(), ResourceError> {
        match self.limits.max_recursion_depth {
            Some(limit) if depth > limit => Err(ResourceError::Recursion { limit }),
            _ => Ok(()),
        }
    }

    fn on_instruction(&mut self) -> Result<(), ResourceError> {
        self.instructions += 1;
        if let Some(limit) = self.limits.max_instructions {
            if self.instructions > limit {
                return Err(ResourceError::Instructions { limit });
            }
        }
        if let Some(limit) = self.limits.max_duration {
            // the clock is sampled every 1024 instructions
            if self.instructions % 1024 == 0 && self.started.elapsed() > limit {
                return Err(ResourceError::Time { limit });
            }
        }
        Ok(())
    }
}
