use crate::error::{GraphormerError, Result};

/// Expected shape of a tensor, `None` marks a free dimension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorShape {
	dims: Vec<Option<usize>>,
}

impl TensorShape {
	pub fn new(dims: Vec<Option<usize>>) -> Self {
		Self { dims }
	}

	pub fn is_compatible_with(&self, shape: &[usize]) -> bool {
		if self.dims.len() != shape.len() {
			return false;
		}
		self.dims
			.iter()
			.zip(shape.iter())
			.all(|(x, &y)| x.map_or(true, |a| a == y))
	}

	/// # Errors
	/// `ShapeMismatch` naming `what` when `shape` is not compatible.
	pub fn check(&self, what: &'static str, shape: &[usize]) -> Result<()> {
		if self.is_compatible_with(shape) {
			Ok(())
		} else {
			Err(GraphormerError::ShapeMismatch {
				what,
				expected: self.dims.clone(),
				found: shape.to_vec(),
			})
		}
	}
}

impl From<Vec<usize>> for TensorShape {
	fn from(v: Vec<usize>) -> Self {
		Self {
			dims: v.into_iter().map(Some).collect(),
		}
	}
}
