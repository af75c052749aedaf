use std::collections::HashMap;
use std::fmt;

use crate::{DType, DataFormat, Shape};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IOName(pub String);

impl fmt::Display for IOName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlotKind {
    Input,
    Output,
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotKind::Input => f.write_str("input"),
            SlotKind::Output => f.write_str("output"),
        }
    }
}

/// Slot name to shape, used for both max-shape overrides and reshape requests.
pub type ShapeMap = HashMap<String, Shape>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorSpec {
    pub name: IOName,
    pub dtype: DType,
    pub rank: usize,
    pub dims: Vec<Option<usize>>, // None = dynamic
    pub format: DataFormat,
}

impl TensorSpec {
    /// Builds a descriptor from a backend-reported shape, where negative
    /// dimensions mean "not fixed by the model".
    pub fn from_reported(name: &str, dtype: DType, reported: &[i64]) -> Self {
        let dims = reported
            .iter()
            .map(|d| usize::try_from(*d).ok())
            .collect::<Vec<_>>();
        Self {
            name: IOName(name.to_string()),
            dtype,
            rank: reported.len(),
            dims,
            format: DataFormat::from_rank(reported.len()),
        }
    }

    /// Dynamic if any dimension past the batch axis is unknown.
    pub fn is_dynamic(&self) -> bool {
        self.dims.iter().skip(1).any(Option::is_none)
    }

    pub fn batch_is_fixed(&self) -> bool {
        self.dims.first().is_some_and(Option::is_some)
    }

    /// The fixed shape, with unknown dimensions replaced by `fill`.
    pub fn shape_filled(&self, fill: usize) -> Shape {
        Shape(self.dims.iter().map(|d| d.unwrap_or(fill)).collect())
    }
}

#[derive(Clone, Debug, Default)]
pub struct ModelSpec {
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
}

impl ModelSpec {
    pub fn input(&self, name: &str) -> Option<&TensorSpec> {
        self.inputs.iter().find(|s| s.name.0 == name)
    }

    pub fn output(&self, name: &str) -> Option<&TensorSpec> {
        self.outputs.iter().find(|s| s.name.0 == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_axis_does_not_make_a_slot_dynamic() {
        let spec = TensorSpec::from_reported("x", DType::F32, &[-1, 3, 224, 224]);
        assert!(!spec.is_dynamic());
        assert!(!spec.batch_is_fixed());
        assert_eq!(spec.dims, vec![None, Some(3), Some(224), Some(224)]);
        assert_eq!(spec.format, DataFormat::NCHW);
    }

    #[test]
    fn inner_unknown_dim_is_dynamic() {
        let spec = TensorSpec::from_reported("ids", DType::I64, &[1, -1]);
        assert!(spec.is_dynamic());
        assert_eq!(spec.shape_filled(1), Shape::from([1, 1]));
    }

    #[test]
    fn scalars_are_static() {
        let spec = TensorSpec::from_reported("s", DType::F32, &[]);
        assert!(!spec.is_dynamic());
        assert_eq!(spec.shape_filled(1).numel(), 1);
    }
}
