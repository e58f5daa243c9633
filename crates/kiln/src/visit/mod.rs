//! visitor pattern helpers
mod transform_leaves;
pub use transform_leaves::TransformLeaves;

use crate::value::Value;

/// Offered every child value of a container, may hand back a replacement
///
/// Returning `Ok(None)` keeps the value and lets the walk descend into it.
pub trait ReplaceLeaf {
    type Error;

    fn replace_leaf(&mut self, value: &Value) -> Result<Option<Value>, Self::Error>;
}

// blanket impl for FnMut
impl<F, E> ReplaceLeaf for F
where
    F: FnMut(&Value) -> Result<Option<Value>, E>,
{
    type Error = E;

    fn replace_leaf(&mut self, value: &Value) -> Result<Option<Value>, E> {
        self(value)
    }
}
