//! Pause tokens and the coalescing [`Pauser`].
//!
//! Several parties may ask a producer to pause at the same time. The producer
//! must actually stop on the first request and may only start again once every
//! request has been released. [`Pauser`] does that bookkeeping and hands out a
//! [`PauseToken`] per request.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// A handle on one outstanding pause request.
///
/// Calling [`resume`](PauseToken::resume) releases the request. Resuming twice
/// is a no-op. Dropping a token without resuming it leaves the request
/// outstanding.
#[must_use = "a pause stays in effect until its token is resumed"]
pub struct PauseToken {
    resume: Option<Box<dyn FnOnce()>>,
}

impl PauseToken {
    /// Create a token that runs `resume` the first time it is resumed
    pub fn new<F>(resume: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Self {
            resume: Some(Box::new(resume)),
        }
    }

    /// A token that does nothing when resumed.
    pub fn noop() -> Self {
        Self { resume: None }
    }

    /// Release this pause request.
    pub fn resume(&mut self) {
        if let Some(resume) = self.resume.take() {
            resume();
        }
    }

    pub fn is_resumed(&self) -> bool {
        self.resume.is_none()
    }
}

impl fmt::Debug for PauseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PauseToken")
            .field("resumed", &self.is_resumed())
            .finish()
    }
}

struct PauserInner {
    pauses: Cell<usize>,
    on_first_pause: Box<dyn Fn()>,
    on_last_resume: Box<dyn Fn()>,
}

/// Coalesces independent pause requests into a single pause/resume pair.
///
/// `on_first_pause` runs when the number of outstanding tokens goes from zero
/// to one, `on_last_resume` when it goes back to zero.
#[derive(Clone)]
pub struct Pauser {
    inner: Rc<PauserInner>,
}

impl Pauser {
    /// Create a new pauser
    pub fn new<P, R>(on_first_pause: P, on_last_resume: R) -> Self
    where
        P: Fn() + 'static,
        R: Fn() + 'static,
    {
        Self {
            inner: Rc::new(PauserInner {
                pauses: Cell::new(0),
                on_first_pause: Box::new(on_first_pause),
                on_last_resume: Box::new(on_last_resume),
            }),
        }
    }

    /// Register a pause request.
    pub fn pause(&self) -> PauseToken {
        let pauses = self.inner.pauses.get() + 1;
        self.inner.pauses.set(pauses);
        if pauses == 1 {
            (self.inner.on_first_pause)();
        }

        let inner = self.inner.clone();
        PauseToken::new(move || {
            let pauses = inner.pauses.get() - 1;
            inner.pauses.set(pauses);
            if pauses == 0 {
                (inner.on_last_resume)();
            }
        })
    }

    /// Number of tokens not yet resumed
    pub fn outstanding(&self) -> usize {
        self.inner.pauses.get()
    }

    pub fn is_paused(&self) -> bool {
        self.outstanding() > 0
    }
}

impl fmt::Debug for Pauser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pauser")
            .field("outstanding", &self.outstanding())
            .finish()
    }
}
