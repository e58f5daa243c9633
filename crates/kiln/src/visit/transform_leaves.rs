use super::ReplaceLeaf;
use crate::value::Value;

/// Recursively offer every array element and object value to a [ReplaceLeaf]
///
/// A replaced value is written back in place and not descended into. A lone scalar has no
/// parent to be written into and is left untouched.
pub trait TransformLeaves {
    fn transform_leaves<R>(&mut self, replacer: &mut R) -> Result<(), R::Error>
    where
        R: ReplaceLeaf + ?Sized;
}

impl TransformLeaves for Value {
    fn transform_leaves<R>(&mut self, replacer: &mut R) -> Result<(), R::Error>
    where
        R: ReplaceLeaf + ?Sized,
    {
        match self {
            Value::Array(array) => {
                for element in array.iter_mut() {
                    visit_child(element, replacer)?;
                }
            }
            Value::Object(object) => {
                for value in object.values_mut() {
                    visit_child(value, replacer)?;
                }
            }
            _ => {}
        }

        Ok(())
    }
}

fn visit_child<R>(child: &mut Value, replacer: &mut R) -> Result<(), R::Error>
where
    R: ReplaceLeaf + ?Sized,
{
    match replacer.replace_leaf(child)? {
        Some(replacement) => *child = replacement,
        None => child.transform_leaves(replacer)?,
    }

    Ok(())
}
