//! Item kinds used for attach-time compatibility checks.
//!
//! Rust generics already guarantee that a `Producer<T>` only flows into a
//! `Consumer<T>`. A [`Kind`] describes finer structure on top of that, such as
//! "lines of UTF-8 text" refining "bytes", and is checked when two stages are
//! attached.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::core::error::{Error, Result};

/// An opaque descriptor of the shape of the items flowing between two stages.
///
/// Kinds form refinement chains: a kind created with [`Kind::refine`] is
/// accepted anywhere its parent is expected, but not the other way around.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Kind(Arc<KindInner>);

#[derive(PartialEq, Eq, Hash)]
struct KindInner {
    name: Cow<'static, str>,
    parent: Option<Kind>,
}

impl Kind {
    /// Create a root kind
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Kind(Arc::new(KindInner {
            name: name.into(),
            parent: None,
        }))
    }

    /// Create a more specific kind that is accepted wherever `self` is.
    pub fn refine(&self, name: impl Into<Cow<'static, str>>) -> Self {
        Kind(Arc::new(KindInner {
            name: name.into(),
            parent: Some(self.clone()),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn parent(&self) -> Option<&Kind> {
        self.0.parent.as_ref()
    }

    /// Returns true if `self` is `other` or one of its refinements.
    pub fn is_or_extends(&self, other: &Kind) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == other {
                return true;
            }
            current = kind.parent();
        }
        false
    }
}

impl fmt::Debug for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Kind({})", self)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = self.parent() {
            write!(f, "{}:", parent)?;
        }
        write!(f, "{}", self.name())
    }
}

/// Check that items of kind `output` may flow into a consumer expecting `input`.
///
/// A missing kind on either side accepts anything.
pub fn check_compatible(output: Option<&Kind>, input: Option<&Kind>) -> Result<()> {
    match (output, input) {
        (Some(out), Some(inp)) if !out.is_or_extends(inp) => {
            Err(Error::type_mismatch(inp.clone(), out.clone()))
        }
        _ => Ok(()),
    }
}
